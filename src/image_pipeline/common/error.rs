use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AcquisitionError {
    #[error("Snap timed out after {0} ms without a frame")]
    Timeout(u64),

    #[error("Frame sink overflow (capacity {0})")]
    BufferOverflow(usize),

    #[error("Unsupported pixel format: {0}")]
    UnsupportedPixelFormat(String),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Camera is busy acquiring")]
    AlreadyBusy,

    #[error("Failed to arm frame producer: {0}")]
    ArmFailed(String),

    #[error("Acquisition was cancelled")]
    Cancelled,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Demosaic failed: {0}")]
    Demosaic(String),

    #[error("Failed to load configuration: {0}")]
    ConfigLoad(String),
}

pub type Result<T> = std::result::Result<T, AcquisitionError>;
