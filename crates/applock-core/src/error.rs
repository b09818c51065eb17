use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("secret is empty")]
    Empty,

    #[error("invalid Base32 character {ch:?} at position {position}")]
    InvalidCharacter { ch: char, position: usize },

    #[error("Base32 secret cannot be {len} characters long")]
    InvalidLength { len: usize },

    #[error("malformed Base32 secret")]
    Malformed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UnlockError {
    #[error("TOTP is enabled but no secret is configured")]
    NotConfigured,

    #[error("code must be exactly 6 digits")]
    InvalidFormat,

    #[error("code does not match")]
    InvalidCode,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PartnerError {
    #[error("partner name is required")]
    EmptyLabel,

    #[error("partner name contains invalid characters")]
    InvalidLabel,

    #[error("secret key is required")]
    EmptySecret,

    #[error("invalid secret key format (use A-Z and 2-7): {0}")]
    InvalidSecret(#[from] DecodeError),

    #[error("secret key too short ({len} characters, minimum {min})")]
    SecretTooShort { len: usize, min: usize },

    #[error("cannot add your own device key")]
    OwnDeviceSecret,

    #[error("partner {0:?} already exists")]
    DuplicateLabel(String),

    #[error("this secret key is already added")]
    DuplicateSecret,

    #[error("no partner named {0:?}")]
    NotFound(String),

    #[error("partner index {index} out of range ({len} partners)")]
    IndexOutOfRange { index: usize, len: usize },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("device secret is already set")]
    AlreadySet,

    #[error("Record not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Unlock(#[from] UnlockError),

    #[error(transparent)]
    Partner(#[from] PartnerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, Error>;
