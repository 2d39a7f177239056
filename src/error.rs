use thiserror::Error;

/// A stanza that does not satisfy the protocol grammar. The stanza is still
/// acked where possible, then dropped.
#[derive(Debug, Error)]
#[error("protocol violation: {0}")]
pub struct ProtocolViolation(pub String);

/// Failure of the external decryption task. Surfaces as a ciphertext-stub
/// message and triggers the retry workflow; never propagated further.
#[derive(Debug, Error)]
pub enum DecryptionError {
    #[error("no signal session with the sending device")]
    NoSession,
    #[error("ciphertext failed authentication")]
    BadMac,
    #[error("malformed ciphertext envelope")]
    InvalidMessage,
    #[error(transparent)]
    Crypto(#[from] anyhow::Error),
}

/// Errors from the transactional key store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key store transaction failed: {0}")]
    Tx(String),
    #[error("prekey pool exhausted")]
    NoPreKeys,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is not open")]
    Closed,
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// Errors surfaced to callers of the outbound media API.
#[derive(Debug, Error)]
pub enum MediaPrepError {
    #[error("document uploads require an explicit mimetype")]
    MissingMimetype,
    #[error("stickers cannot carry a caption")]
    CaptionNotAllowed,
    #[error("media upload failed: {0}")]
    UploadFailed(String),
    #[error("media encryption failed: {0}")]
    Encryption(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
