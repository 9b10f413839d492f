//! Identifier and fingerprint helpers

use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique, time-ordered id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Short, stable stand-in for an account number in log lines.
pub fn account_fingerprint(account: &str) -> String {
    let digest = sha256::digest(account);
    digest[..12].to_string()
}

/// Strip whitespace and upper-case an IBAN/BIC as typed into a form.
pub fn normalise_account(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bech32_ids_carry_prefix_and_are_unique() {
        let a = new_uuid_to_bech32("sdd").unwrap();
        let b = new_uuid_to_bech32("sdd").unwrap();

        assert!(a.starts_with("sdd1"));
        assert_ne!(a, b);
    }

    #[test]
    fn empty_hrp_is_rejected() {
        assert!(new_uuid_to_bech32("").is_err());
    }

    #[test]
    fn fingerprint_hides_account() {
        let fp = account_fingerprint("DE89370400440532013000");
        assert_eq!(fp.len(), 12);
        assert!(!fp.contains("DE89"));
        assert_eq!(fp, account_fingerprint("DE89370400440532013000"));
    }

    #[test]
    fn normalises_spacing_and_case() {
        assert_eq!(normalise_account(" de89 3704 0044 0532 0130 00 "), "DE89370400440532013000");
    }
}
