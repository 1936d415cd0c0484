use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid key bytes")]
    InvalidKeyBytes,

    #[error("Invalid identity id: {0}")]
    InvalidId(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopicError {
    #[error("A topic needs at least {min} distinct participants, got {found}")]
    TooFewParticipants { found: usize, min: usize },

    #[error("Invalid participant in topic id: {0}")]
    InvalidParticipant(String),

    #[error("Topic id is not in canonical sorted form: {0}")]
    NotCanonical(String),
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Failed to encode sync message: {0}")]
    Encode(String),

    #[error("Failed to decode sync message: {0}")]
    Decode(String),

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}
