use thiserror::Error;

/// Error taxonomy for the whole toolkit. Every fallible core operation
/// returns one of these kinds so a CLI boundary can map it to an exit
/// code without re-inspecting the message text.
#[derive(Debug, Error)]
pub enum VorteilError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("image size {size} is not a multiple of 512 bytes")]
    UnalignedSize { size: u64 },

    #[error("requested size {requested} is smaller than the minimum size {minimum}")]
    SizeTooSmall { requested: u64, minimum: u64 },

    #[error("region [{offset}, {offset_plus_len}) is out of bounds")]
    RegionOutOfBounds { offset: u64, offset_plus_len: u64 },

    #[error("bad package: {0}")]
    BadPackage(String),

    #[error("bad image: {0}")]
    BadImage(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cannot rewind a non-seekable stream")]
    CannotRewind,

    #[error("stream does not support reading")]
    UnsupportedRead,

    #[error("stream does not support writing")]
    UnsupportedWrite,

    #[error("kernel bundle signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, VorteilError>;

impl VorteilError {
    /// Numbered exit-code taxonomy consumed by CLI-layer callers (spec §6).
    pub fn exit_code(&self) -> i32 {
        match self {
            VorteilError::InvalidInput(_) => 2,
            VorteilError::UnalignedSize { .. } => 3,
            VorteilError::SizeTooSmall { .. } => 4,
            VorteilError::RegionOutOfBounds { .. } => 5,
            VorteilError::BadPackage(_) => 6,
            VorteilError::BadImage(_) => 7,
            VorteilError::NotFound(_) => 8,
            VorteilError::UnsupportedFormat(_) => 9,
            VorteilError::Io(_) => 10,
            VorteilError::Serialization(_) => 11,
            VorteilError::CannotRewind | VorteilError::UnsupportedRead | VorteilError::UnsupportedWrite => 12,
            VorteilError::SignatureInvalid(_) => 13,
            VorteilError::Cancelled => 14,
            VorteilError::Other(_) => 1,
        }
    }
}
