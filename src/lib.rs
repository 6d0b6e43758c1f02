#![cfg_attr(not(test), no_std)]

pub mod card;
pub mod disk;
pub mod fat;
pub mod transport;

pub use card::{CardConfig, CardError, CardType, CardVersion, SdCard};
pub use disk::{BlockDevice, DiskError, DiskStatus, IoctlCommand};
pub use fat::{
    Attr, Dir, FatError, FatFs, FatType, File, FileInfo, FixedTime, OpenMode, TimeSource,
    VolumeInfo, VolumeLabel,
};
pub use transport::{BusSpeed, SpiTransport, Transport, TransportError};

pub const SECTOR_SIZE: usize = 512;
