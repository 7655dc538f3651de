use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("gpio error: {0}")]
    Gpio(String),
    #[error("one-wire device not present: {0}")]
    DeviceNotPresent(String),
    #[error("one-wire bus not available at {0}")]
    BusMissing(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
