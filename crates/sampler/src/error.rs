#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to open decoder for '{path}': {message}")]
    DecoderOpen { path: String, message: String },

    #[error("decoder seek failed: {message}")]
    DecoderSeek { message: String },

    #[error("decoder read failed: {message}")]
    DecoderRead { message: String },

    #[error("slot index {index} is out of range (slot count = {count})")]
    SlotOutOfRange { index: i32, count: usize },

    #[error("slot {index} has no loaded media")]
    SlotEmpty { index: usize },

    #[error("voice pool exhausted: no free or stealable voice")]
    VoicePoolExhausted,

    #[error("invalid parameter '{key}': {message}")]
    InvalidParameter { key: String, message: String },

    #[error("session snapshot error: {message}")]
    Persistence { message: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
