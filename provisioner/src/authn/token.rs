//! Bearer token sources for the Google APIs

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::errors::ClawError;
use crate::filesys::file::File;

/// Source of an OAuth access token, queried before every API call
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> Result<SecretString, ClawError>;
}

/// A fixed token, e.g. from `GOOGLE_OAUTH_ACCESS_TOKEN`
pub struct StaticToken {
    token: SecretString,
}

impl StaticToken {
    pub fn new(token: SecretString) -> Self {
        Self { token }
    }

    /// Read the token from an environment variable
    pub fn from_env(var: &str) -> Result<Self, ClawError> {
        let token = std::env::var(var)
            .map_err(|_| ClawError::ConfigError(format!("{} is not set", var)))?;
        if token.trim().is_empty() {
            return Err(ClawError::ConfigError(format!("{} is empty", var)));
        }
        Ok(Self::new(SecretString::from(token.trim().to_string())))
    }
}

#[async_trait]
impl AccessTokenSource for StaticToken {
    async fn access_token(&self) -> Result<SecretString, ClawError> {
        Ok(self.token.clone())
    }
}

/// A token file kept fresh by an external refresher; re-read on every call
pub struct TokenFile {
    file: File,
}

impl TokenFile {
    pub fn new(file: File) -> Self {
        Self { file }
    }
}

#[async_trait]
impl AccessTokenSource for TokenFile {
    async fn access_token(&self) -> Result<SecretString, ClawError> {
        debug!("reading access token from {}", self.file.path().display());
        let raw = self.file.read_string().await?;
        let token = SecretString::from(raw.trim().to_string());
        if token.expose_secret().is_empty() {
            return Err(ClawError::ConfigError(format!(
                "token file {} is empty",
                self.file.path().display()
            )));
        }
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token() {
        let source = StaticToken::new(SecretString::from("ya29.abc".to_string()));
        let token = source.access_token().await.unwrap();
        assert_eq!(token.expose_secret(), "ya29.abc");
    }

    #[tokio::test]
    async fn test_token_file_is_reread() {
        let path = std::env::temp_dir().join(format!("clawctl-token-{}", uuid::Uuid::new_v4()));
        std::fs::write(&path, "first\n").unwrap();
        let source = TokenFile::new(File::new(&path));
        assert_eq!(source.access_token().await.unwrap().expose_secret(), "first");

        std::fs::write(&path, "second").unwrap();
        assert_eq!(source.access_token().await.unwrap().expose_secret(), "second");

        std::fs::write(&path, "  \n").unwrap();
        assert!(source.access_token().await.is_err());
        let _ = std::fs::remove_file(path);
    }
}
