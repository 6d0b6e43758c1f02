#![allow(dead_code)]

pub mod fake_card;
pub mod mkfs;

use std::collections::BTreeMap;

use spi_fatfs::{BlockDevice, DiskError, DiskStatus, IoctlCommand, SECTOR_SIZE};

pub type Sector = [u8; SECTOR_SIZE];

/// Sparse sector store; sectors never written read back as zeros.
#[derive(Clone, Debug, Default)]
pub struct Image {
    pub total_sectors: u32,
    pub sectors: BTreeMap<u32, Sector>,
}

impl Image {
    pub fn new(total_sectors: u32) -> Self {
        Self {
            total_sectors,
            sectors: BTreeMap::new(),
        }
    }

    pub fn sector(&self, lba: u32) -> Sector {
        self.sectors.get(&lba).copied().unwrap_or([0; SECTOR_SIZE])
    }

    pub fn sector_mut(&mut self, lba: u32) -> &mut Sector {
        self.sectors.entry(lba).or_insert([0; SECTOR_SIZE])
    }

    pub fn put(&mut self, lba: u32, data: &[u8]) {
        self.sector_mut(lba).copy_from_slice(data);
    }
}

/// In-memory block device with fault injection and I/O accounting.
#[derive(Debug)]
pub struct RamDisk {
    pub image: Image,
    pub status: DiskStatus,
    pub write_protected: bool,
    pub present: bool,
    /// Remaining sector writes before every further write fails.
    pub writes_left: Option<usize>,
    pub fail_reads: bool,
    pub sectors_read: usize,
    pub sectors_written: usize,
    pub write_log: Vec<u32>,
    pub syncs: usize,
    pub initializations: usize,
}

impl RamDisk {
    pub fn new(image: Image) -> Self {
        Self {
            image,
            status: DiskStatus::NOT_INITIALIZED,
            write_protected: false,
            present: true,
            writes_left: None,
            fail_reads: false,
            sectors_read: 0,
            sectors_written: 0,
            write_log: Vec::new(),
            syncs: 0,
            initializations: 0,
        }
    }

    pub fn blank(total_sectors: u32) -> Self {
        Self::new(Image::new(total_sectors))
    }

    /// Simulates the medium being swapped: the next access re-initializes.
    pub fn eject(&mut self) {
        self.status.insert(DiskStatus::NOT_INITIALIZED);
    }

    pub fn reset_counters(&mut self) {
        self.sectors_read = 0;
        self.sectors_written = 0;
        self.write_log.clear();
        self.syncs = 0;
    }

    fn check_range(&self, sector: u32, count: usize) -> Result<(), DiskError> {
        if sector as u64 + count as u64 > self.image.total_sectors as u64 {
            return Err(DiskError::InvalidParameter);
        }
        Ok(())
    }
}

impl BlockDevice for RamDisk {
    fn status(&self) -> DiskStatus {
        self.status
    }

    fn initialize(&mut self) -> DiskStatus {
        self.initializations += 1;
        self.status = if self.present {
            DiskStatus::empty()
        } else {
            DiskStatus::NOT_INITIALIZED | DiskStatus::NO_DISK
        };
        if self.write_protected {
            self.status.insert(DiskStatus::WRITE_PROTECTED);
        }
        self.status
    }

    fn read(&mut self, sector: u32, buf: &mut [u8]) -> Result<(), DiskError> {
        if self.status.contains(DiskStatus::NOT_INITIALIZED) {
            return Err(DiskError::NotReady);
        }
        if buf.is_empty() || buf.len() % SECTOR_SIZE != 0 {
            return Err(DiskError::InvalidParameter);
        }
        let count = buf.len() / SECTOR_SIZE;
        self.check_range(sector, count)?;
        if self.fail_reads {
            return Err(DiskError::Error);
        }
        for (i, chunk) in buf.chunks_exact_mut(SECTOR_SIZE).enumerate() {
            chunk.copy_from_slice(&self.image.sector(sector + i as u32));
        }
        self.sectors_read += count;
        Ok(())
    }

    fn write(&mut self, sector: u32, buf: &[u8]) -> Result<(), DiskError> {
        if self.status.contains(DiskStatus::NOT_INITIALIZED) {
            return Err(DiskError::NotReady);
        }
        if self.write_protected {
            return Err(DiskError::WriteProtected);
        }
        if buf.is_empty() || buf.len() % SECTOR_SIZE != 0 {
            return Err(DiskError::InvalidParameter);
        }
        let count = buf.len() / SECTOR_SIZE;
        self.check_range(sector, count)?;
        for (i, chunk) in buf.chunks_exact(SECTOR_SIZE).enumerate() {
            if let Some(left) = self.writes_left.as_mut() {
                if *left == 0 {
                    return Err(DiskError::Error);
                }
                *left -= 1;
            }
            let lba = sector + i as u32;
            self.image.put(lba, chunk);
            self.write_log.push(lba);
            self.sectors_written += 1;
        }
        Ok(())
    }

    fn ioctl(&mut self, cmd: IoctlCommand) -> Result<u32, DiskError> {
        if self.status.contains(DiskStatus::NOT_INITIALIZED) {
            return Err(DiskError::NotReady);
        }
        match cmd {
            IoctlCommand::Sync => {
                self.syncs += 1;
                Ok(0)
            }
            IoctlCommand::SectorCount => Ok(self.image.total_sectors),
            IoctlCommand::SectorSize => Ok(SECTOR_SIZE as u32),
            IoctlCommand::BlockSize => Ok(1),
        }
    }
}

/// Deterministic byte pattern for file content checks.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u32).wrapping_mul(31).wrapping_add(seed as u32) as u8)
        .collect()
}
