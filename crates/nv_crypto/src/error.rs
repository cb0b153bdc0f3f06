use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("AEAD encryption failed")]
    Encrypt,

    #[error("AEAD authentication failed — wrong key, truncated or tampered data")]
    Authentication,

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Ciphertext stream exceeds maximum length")]
    StreamTooLong,

    #[error("I/O failure in streaming cipher: {0}")]
    Io(#[from] std::io::Error),

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
