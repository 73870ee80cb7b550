use std::fmt;
use thiserror::Error;

/// Result type for localkms operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the key management service
///
/// Every variant carries a human-readable message. Callers that need to branch on
/// the failure should match on [`Error::kind`] rather than on the message text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The key, alias, grant or custom key store does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A resource with the same name already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The key state does not permit the operation
    #[error("Invalid key state: {0}")]
    InvalidState(String),

    /// The ARN is malformed
    #[error("Invalid ARN: {0}")]
    InvalidArn(String),

    /// The key identifier is malformed
    #[error("Invalid key id: {0}")]
    InvalidKeyId(String),

    /// The key is disabled
    #[error("Key disabled: {0}")]
    Disabled(String),

    /// The key cannot be used right now; the request may be retried
    #[error("Key unavailable: {0}")]
    KeyUnavailable(String),

    /// The ciphertext blob is malformed, tampered with, or bound to another context
    #[error("Invalid ciphertext: {0}")]
    InvalidCiphertext(String),

    /// The ciphertext was produced under a different key than the one requested
    #[error("Incorrect key: {0}")]
    IncorrectKey(String),

    /// The key usage does not include the requested operation
    #[error("Invalid key usage: {0}")]
    InvalidKeyUsage(String),

    /// A presented grant token is unknown or retired
    #[error("Invalid grant token: {0}")]
    InvalidGrantToken(String),

    /// The grant id does not name a grant on the key
    #[error("Invalid grant id: {0}")]
    InvalidGrantId(String),

    /// A quota was exceeded
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    /// The key policy document is not valid
    #[error("Malformed policy: {0}")]
    MalformedPolicy(String),

    /// The operation is not supported for this key
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// The import token has expired
    #[error("Expired import token: {0}")]
    ExpiredImportToken(String),

    /// The import token is unknown or was issued for another key
    #[error("Invalid import token: {0}")]
    InvalidImportToken(String),

    /// The imported key material is not acceptable for the key
    #[error("Incorrect key material: {0}")]
    IncorrectKeyMaterial(String),

    /// A tag key or value is invalid
    #[error("Tag error: {0}")]
    Tag(String),

    /// The alias name is malformed or reserved
    #[error("Invalid alias name: {0}")]
    InvalidAliasName(String),

    /// The caller is not permitted to perform the operation
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// A request parameter failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// An internal invariant was violated
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Kind of an [`Error`], without its message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidState,
    InvalidArn,
    InvalidKeyId,
    Disabled,
    KeyUnavailable,
    InvalidCiphertext,
    IncorrectKey,
    InvalidKeyUsage,
    InvalidGrantToken,
    InvalidGrantId,
    LimitExceeded,
    MalformedPolicy,
    UnsupportedOperation,
    ExpiredImportToken,
    InvalidImportToken,
    IncorrectKeyMaterial,
    Tag,
    InvalidAliasName,
    AccessDenied,
    Validation,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Error {
    /// Returns the kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Error::InvalidState(_) => ErrorKind::InvalidState,
            Error::InvalidArn(_) => ErrorKind::InvalidArn,
            Error::InvalidKeyId(_) => ErrorKind::InvalidKeyId,
            Error::Disabled(_) => ErrorKind::Disabled,
            Error::KeyUnavailable(_) => ErrorKind::KeyUnavailable,
            Error::InvalidCiphertext(_) => ErrorKind::InvalidCiphertext,
            Error::IncorrectKey(_) => ErrorKind::IncorrectKey,
            Error::InvalidKeyUsage(_) => ErrorKind::InvalidKeyUsage,
            Error::InvalidGrantToken(_) => ErrorKind::InvalidGrantToken,
            Error::InvalidGrantId(_) => ErrorKind::InvalidGrantId,
            Error::LimitExceeded(_) => ErrorKind::LimitExceeded,
            Error::MalformedPolicy(_) => ErrorKind::MalformedPolicy,
            Error::UnsupportedOperation(_) => ErrorKind::UnsupportedOperation,
            Error::ExpiredImportToken(_) => ErrorKind::ExpiredImportToken,
            Error::InvalidImportToken(_) => ErrorKind::InvalidImportToken,
            Error::IncorrectKeyMaterial(_) => ErrorKind::IncorrectKeyMaterial,
            Error::Tag(_) => ErrorKind::Tag,
            Error::InvalidAliasName(_) => ErrorKind::InvalidAliasName,
            Error::AccessDenied(_) => ErrorKind::AccessDenied,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if the caller may retry the request unchanged
    ///
    /// Only [`ErrorKind::KeyUnavailable`] is transient; every other kind is terminal for
    /// the request that produced it.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::KeyUnavailable
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::Internal(format!("lock poisoned: {}", err))
    }
}
