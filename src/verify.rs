//! Bank account verification
//!
//! The processor only needs a pass/fail answer with a message. [`StandardVerifier`]
//! checks IBANs against ISO 13616 (country length + mod-97 checksum) and BICs
//! against the ISO 9362 shape.
use crate::types::CreditorType;

pub trait AccountVerifier {
    /// `None` when the IBAN is acceptable, otherwise a message for the user.
    fn verify_iban(&self, iban: &str) -> Option<String>;
    fn verify_bic(&self, bic: &str) -> Option<String>;
    /// Account reference for creditors collecting through a payment service provider.
    fn verify_psp_code(&self, code: &str) -> Option<String>;
    fn verify_psp_bic(&self, bic: &str) -> Option<String>;
}

/// Run the account/BIC checks that apply to `creditor_type`.
///
/// Returns the failing field name with its message.
pub fn verify_account<V: AccountVerifier + ?Sized>(
    verifier: &V,
    creditor_type: CreditorType,
    account: &str,
    bic: Option<&str>,
) -> Result<(), (&'static str, String)> {
    let (account_issue, bic_issue) = match creditor_type {
        CreditorType::Sepa => (
            verifier.verify_iban(account),
            bic.and_then(|b| verifier.verify_bic(b)),
        ),
        CreditorType::Psp => (
            verifier.verify_psp_code(account),
            bic.and_then(|b| verifier.verify_psp_bic(b)),
        ),
    };
    if let Some(message) = account_issue {
        return Err(("iban", message));
    }
    if let Some(message) = bic_issue {
        return Err(("bic", message));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StandardVerifier;

impl AccountVerifier for StandardVerifier {
    fn verify_iban(&self, iban: &str) -> Option<String> {
        if iban.len() < 4 || !iban.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Some("IBAN is malformed".into());
        }
        let country = &iban[..2];
        if !country.chars().all(|c| c.is_ascii_uppercase()) {
            return Some("IBAN does not start with a country code".into());
        }
        match iban_length(country) {
            Some(expected) if expected != iban.len() => {
                return Some(format!("IBAN for {country} must have {expected} characters"));
            }
            None => return Some(format!("IBAN country {country} is not supported")),
            _ => {}
        }
        if mod97(iban) != Some(1) {
            return Some("IBAN checksum is invalid".into());
        }
        None
    }

    fn verify_bic(&self, bic: &str) -> Option<String> {
        let valid_len = bic.len() == 8 || bic.len() == 11;
        let shape = bic.char_indices().all(|(i, c)| match i {
            0..=5 => c.is_ascii_uppercase(),
            _ => c.is_ascii_uppercase() || c.is_ascii_digit(),
        });
        if !valid_len || !shape {
            return Some("This is not a correct BIC.".into());
        }
        None
    }

    fn verify_psp_code(&self, code: &str) -> Option<String> {
        if code.is_empty() || code.len() > 34 || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Some("This is not a correct account reference.".into());
        }
        None
    }

    fn verify_psp_bic(&self, bic: &str) -> Option<String> {
        if bic.is_empty() || bic.len() > 11 {
            return Some("This is not a correct PSP identifier.".into());
        }
        None
    }
}

// ISO 13616 move-four-to-the-back, letters as 10..35, remainder mod 97
fn mod97(iban: &str) -> Option<u32> {
    let rearranged = iban[4..].chars().chain(iban[..4].chars());
    let mut remainder = 0u32;
    for c in rearranged {
        let value = c.to_digit(36)?;
        remainder = if value < 10 {
            (remainder * 10 + value) % 97
        } else {
            (remainder * 100 + value) % 97
        };
    }
    Some(remainder)
}

fn iban_length(country: &str) -> Option<usize> {
    let len = match country {
        "AD" => 24,
        "AT" => 20,
        "BE" => 16,
        "BG" => 22,
        "CH" => 21,
        "CY" => 28,
        "CZ" => 24,
        "DE" => 22,
        "DK" => 18,
        "EE" => 20,
        "ES" => 24,
        "FI" => 18,
        "FR" => 27,
        "GB" => 22,
        "GI" => 23,
        "GR" => 27,
        "HR" => 21,
        "HU" => 28,
        "IE" => 22,
        "IS" => 26,
        "IT" => 27,
        "LI" => 21,
        "LT" => 20,
        "LU" => 20,
        "LV" => 21,
        "MC" => 27,
        "MT" => 31,
        "NL" => 18,
        "NO" => 15,
        "PL" => 28,
        "PT" => 25,
        "RO" => 24,
        "SE" => 24,
        "SI" => 19,
        "SK" => 24,
        "SM" => 27,
        "VA" => 22,
        _ => return None,
    };
    Some(len)
}
