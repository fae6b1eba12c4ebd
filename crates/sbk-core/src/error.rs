use std::path::PathBuf;

use thiserror::Error;

pub type SbkResult<T> = Result<T, SbkError>;

#[derive(Debug, Error)]
pub enum SbkError {
    /// Bad magic or truncated header. Never retried.
    #[error("not a SecureBackup file or header corrupted: {0}")]
    Format(String),

    /// AEAD tag mismatch. Wrong password and tampered data are
    /// deliberately reported the same way.
    #[error("decryption failed: wrong password or corrupted data")]
    Authentication,

    #[error("could not read source {}: {source}", path.display())]
    SourceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Resource {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("password must not be empty")]
    EmptyPassword,

    #[error("key derivation failed: {0}")]
    Kdf(String),

    /// Cipher failure while sealing, not tied to any input data
    #[error("encryption failed: {0}")]
    Crypto(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification handed to presentation layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Format,
    Authentication,
    SourceRead,
    Resource,
    InvalidInput,
}

impl SbkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SbkError::Format(_) | SbkError::Archive(_) => ErrorKind::Format,
            SbkError::Authentication => ErrorKind::Authentication,
            SbkError::SourceRead { .. } => ErrorKind::SourceRead,
            SbkError::Resource { .. }
            | SbkError::Kdf(_)
            | SbkError::Crypto(_)
            | SbkError::Io(_) => ErrorKind::Resource,
            SbkError::EmptyPassword | SbkError::Config(_) => ErrorKind::InvalidInput,
        }
    }

    /// Wrap an I/O error with a human-readable description of what failed.
    pub fn resource(context: impl Into<String>, source: std::io::Error) -> Self {
        SbkError::Resource {
            context: context.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(SbkError::Format("x".into()).kind(), ErrorKind::Format);
        assert_eq!(SbkError::Authentication.kind(), ErrorKind::Authentication);
        assert_eq!(SbkError::EmptyPassword.kind(), ErrorKind::InvalidInput);
        assert_eq!(SbkError::Archive("x".into()).kind(), ErrorKind::Format);
        assert_eq!(SbkError::Crypto("seal".into()).kind(), ErrorKind::Resource);

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(SbkError::resource("creating dir", io).kind(), ErrorKind::Resource);
    }

    #[test]
    fn test_authentication_message_does_not_leak_cause() {
        let msg = SbkError::Authentication.to_string();
        assert!(msg.contains("wrong password or corrupted data"));
    }
}
