use thiserror::Error;

#[derive(Error, Debug)]
pub enum SlotError {
    #[error("store is not initialized, call begin() first")]
    NotInitialized,

    #[error("begin() was already called on this store")]
    AlreadyInitialized,

    #[error("slot number {0} is out of range")]
    InvalidSlot(u8),

    #[error("payload must contain at least one byte")]
    EmptyPayload,

    #[error("payload of {0} bytes exceeds the 256 byte slot limit")]
    PayloadTooLarge(usize),

    #[error("no data stored in slot {0}")]
    SlotEmpty(u8),

    #[error("buffer too small: {needed} bytes required")]
    BufferTooSmall { needed: usize },

    #[error("not enough free space after provision accounting")]
    NoSpace,

    #[error("NVM read failed at address {addr}")]
    NvmRead { addr: usize },

    #[error("NVM write failed at address {addr}")]
    NvmWrite { addr: usize },

    #[error("invalid geometry: {0}")]
    Geometry(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SlotError>;
