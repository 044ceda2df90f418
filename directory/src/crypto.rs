const ENCRYPTED_PREFIX: &str = "encrypted:";

/// Turns a stored credential into the plaintext API key.
///
/// This is a placeholder: values tagged `encrypted:` only have the tag
/// stripped, anything else is returned as is. It must be replaced with real
/// KMS-backed decryption before credentials are stored in production.
pub fn decrypt_secret(value: &str) -> String {
    value
        .strip_prefix(ENCRYPTED_PREFIX)
        .unwrap_or(value)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decrypt_secret() {
        assert_eq!(decrypt_secret("encrypted:VF.DM.abc"), "VF.DM.abc");
        assert_eq!(decrypt_secret("VF.DM.abc"), "VF.DM.abc");
        // Only the leading tag is stripped
        assert_eq!(decrypt_secret("encrypted:encrypted:x"), "encrypted:x");
    }
}
