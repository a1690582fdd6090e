//! Utility functions for identifiers and credential generation

use bech32::Bech32m;
use rand::{Rng, distributions::Alphanumeric};
use uuid7::uuid7;

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Generate a random alphanumeric password of `len` characters.
pub fn generate_password(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bech32_ids_carry_prefix() {
        let id = new_uuid_to_bech32("deal_").unwrap();
        assert!(id.starts_with("deal_1"));
    }

    #[test]
    fn generated_password_has_requested_length() {
        let pw = generate_password(24);
        assert_eq!(pw.len(), 24);
        assert!(pw.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
