use secrecy::SecretString;

#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub identity_url: String,
    pub base_url: String,
    pub identity_token: SecretString,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(identity_url: String, base_url: String) -> Self {
        Self {
            identity_url,
            base_url,
            identity_token: SecretString::default(),
        }
    }

    pub fn set_token(&mut self, token: SecretString) {
        self.identity_token = token;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_global_args() {
        let args = GlobalArgs::new(
            "https://id.example.org".to_string(),
            "http://localhost:3000".to_string(),
        );
        assert_eq!(args.identity_url, "https://id.example.org");
        assert_eq!(args.base_url, "http://localhost:3000");
        assert_eq!(args.identity_token.expose_secret(), "");
    }
}
