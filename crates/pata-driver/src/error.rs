use thiserror::Error;

pub type Result<T> = std::result::Result<T, AtaError>;

#[derive(Debug, Error)]
pub enum AtaError {
    #[error("device fault (DF set), status 0x{status:02x}")]
    DeviceFault { status: u8 },

    #[error("device reported an error: status 0x{status:02x}, error 0x{error:02x}")]
    DeviceError { status: u8, error: u8 },

    #[error("device did not assert DRQ when data was expected, status 0x{status:02x}")]
    NoDrq { status: u8 },

    #[error("sector {lba} failed write verification after {attempts} attempts")]
    WriteVerifyFailed { lba: u64, attempts: u32 },

    #[error("device is read-only")]
    WriteUnsupported,

    #[error("unaligned buffer length {len} (expected multiple of {alignment})")]
    UnalignedLength { len: usize, alignment: usize },

    #[error("no medium present")]
    NoMedium,

    #[error("ATAPI packet phase error, status 0x{status:02x}")]
    PacketError { status: u8 },

    #[error("DMA region allocation failed")]
    DmaAllocFailed,
}
