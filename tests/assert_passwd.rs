use simplestream::utils;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_to_secret() {
        let password = "2bd334f9-fbc9-74ea-8ecb-bbb56771999d";
        let secret = utils::password_to_secret(password);
        assert_eq!(secret.len(), 32);
        assert_eq!(utils::secret_from_hex(&utils::secret_to_hex(&secret)).unwrap(), secret);
    }

    #[test]
    fn test_empty_password_secret() {
        // sha256("")
        let expected = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        assert_eq!(utils::secret_to_hex(&utils::password_to_secret("")), expected);
    }
}
