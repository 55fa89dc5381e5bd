#[cfg(test)]
mod tests {
    use crate::secrets::*;
    use base64::{engine::general_purpose, Engine as _};

    fn test_key() -> String {
        general_purpose::STANDARD.encode([7u8; 32])
    }

    #[test]
    fn test_encrypt_then_decrypt_returns_plaintext() {
        let key = test_key();
        let sealed = encrypt_secret(&key, "app-specific-password").unwrap();

        assert_ne!(sealed, "app-specific-password");
        assert_eq!(
            decrypt_secret(&key, &sealed).unwrap(),
            "app-specific-password"
        );
    }

    #[test]
    fn test_encrypt_uses_fresh_nonce() {
        let key = test_key();
        let a = encrypt_secret(&key, "same").unwrap();
        let b = encrypt_secret(&key, "same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_decrypt_with_wrong_key_fails() {
        let sealed = encrypt_secret(&test_key(), "secret").unwrap();
        let other_key = general_purpose::STANDARD.encode([9u8; 32]);

        assert!(matches!(
            decrypt_secret(&other_key, &sealed),
            Err(SecretError::DecryptionError(_))
        ));
    }

    #[test]
    fn test_short_key_is_rejected() {
        let short = general_purpose::STANDARD.encode([1u8; 16]);
        assert!(matches!(
            encrypt_secret(&short, "x"),
            Err(SecretError::KeyError(_))
        ));
    }

    #[test]
    fn test_reveal_secret_passes_plain_values_through() {
        assert_eq!(reveal_secret(None, "plain").unwrap(), "plain");
        assert!(!is_encrypted("plain"));
    }

    #[test]
    fn test_reveal_secret_decrypts_marked_values() {
        let key = test_key();
        let stored = format!("{}{}", ENCRYPTED_MARKER, encrypt_secret(&key, "pw").unwrap());

        assert!(is_encrypted(&stored));
        assert_eq!(reveal_secret(Some(&key), &stored).unwrap(), "pw");
        assert!(matches!(
            reveal_secret(None, &stored),
            Err(SecretError::KeyError(_))
        ));
    }
}
