pub mod correlator;
pub mod creditor;
pub mod error;
pub mod host;
pub mod logging;
pub mod mandate;
pub mod processor;
pub mod reconcile;
pub mod schedule;
pub mod settings;
pub mod settlement;
pub mod store;
pub mod types;
pub mod utils;
pub mod verify;

pub use correlator::{CorrelationToken, PendingMandates};
pub use error::{HostError, SepaError};
pub use processor::{PaymentOutcome, PaymentRequest, ProcessorConfig, SepaProcessor};
pub use reconcile::{PartialMandateReconciler, ReconcileReport};
