//! Block device contract consumed by the filesystem engine.

use core::fmt;

use bitflags::bitflags;

use crate::SECTOR_SIZE;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct DiskStatus: u8 {
        const NOT_INITIALIZED = 0x01;
        const NO_DISK = 0x02;
        const WRITE_PROTECTED = 0x04;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiskError {
    Error,
    WriteProtected,
    NotReady,
    InvalidParameter,
}

impl fmt::Display for DiskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Error => "hard error during block transfer",
            Self::WriteProtected => "medium is write protected",
            Self::NotReady => "device not ready",
            Self::InvalidParameter => "invalid parameter",
        };
        f.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoctlCommand {
    /// Wait for any pending internal write to finish.
    Sync,
    SectorCount,
    SectorSize,
    /// Erase block size in sectors.
    BlockSize,
}

/// Sector-addressed storage with 512-byte sectors.
///
/// `read` and `write` transfer `buf.len() / 512` consecutive sectors starting
/// at `sector`; the buffer length must be a non-zero multiple of 512.
pub trait BlockDevice {
    fn status(&self) -> DiskStatus;
    fn initialize(&mut self) -> DiskStatus;
    fn read(&mut self, sector: u32, buf: &mut [u8]) -> Result<(), DiskError>;
    fn write(&mut self, sector: u32, buf: &[u8]) -> Result<(), DiskError>;
    fn ioctl(&mut self, cmd: IoctlCommand) -> Result<u32, DiskError>;
}

impl<D: BlockDevice + ?Sized> BlockDevice for &mut D {
    fn status(&self) -> DiskStatus {
        (**self).status()
    }

    fn initialize(&mut self) -> DiskStatus {
        (**self).initialize()
    }

    fn read(&mut self, sector: u32, buf: &mut [u8]) -> Result<(), DiskError> {
        (**self).read(sector, buf)
    }

    fn write(&mut self, sector: u32, buf: &[u8]) -> Result<(), DiskError> {
        (**self).write(sector, buf)
    }

    fn ioctl(&mut self, cmd: IoctlCommand) -> Result<u32, DiskError> {
        (**self).ioctl(cmd)
    }
}

pub(crate) fn sector_count(len: usize) -> Result<usize, DiskError> {
    if len == 0 || len % SECTOR_SIZE != 0 {
        return Err(DiskError::InvalidParameter);
    }
    Ok(len / SECTOR_SIZE)
}
