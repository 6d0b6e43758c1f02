use core::fmt;

use crate::disk::DiskError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FatError {
    /// Unrecoverable block device failure.
    Disk,
    /// On-disk structure or internal state is inconsistent.
    Internal,
    NotReady,
    NoFile,
    NoPath,
    InvalidName,
    /// Access refused: wrong mode, read-only object, non-empty directory or
    /// no free cluster left.
    Denied,
    Exist,
    InvalidObject,
    WriteProtected,
    InvalidDrive,
    NotEnabled,
    NoFilesystem,
    InvalidParameter,
}

impl fmt::Display for FatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Disk => "disk error",
            Self::Internal => "internal filesystem error",
            Self::NotReady => "drive not ready",
            Self::NoFile => "no such file",
            Self::NoPath => "no such path",
            Self::InvalidName => "invalid path name",
            Self::Denied => "access denied",
            Self::Exist => "object already exists",
            Self::InvalidObject => "invalid or stale object",
            Self::WriteProtected => "drive is write protected",
            Self::InvalidDrive => "invalid drive number",
            Self::NotEnabled => "volume has no work area",
            Self::NoFilesystem => "no FAT volume found",
            Self::InvalidParameter => "invalid parameter",
        };
        f.write_str(text)
    }
}

// A failed transfer is reported as a disk error whatever the device said;
// readiness and write protection are checked through the status bits.
impl From<DiskError> for FatError {
    fn from(_: DiskError) -> Self {
        Self::Disk
    }
}
