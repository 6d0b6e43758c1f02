//! SD/MMC card driver speaking the SPI-mode command protocol.

mod command;
mod csd;
mod init;
mod io;

use log::{debug, warn};

use crate::{
    disk::{self, BlockDevice, DiskError, DiskStatus, IoctlCommand},
    transport::Transport,
};

pub(crate) const CMD0: u8 = 0;
pub(crate) const CMD1: u8 = 1;
pub(crate) const CMD8: u8 = 8;
pub(crate) const CMD9: u8 = 9;
pub(crate) const CMD12: u8 = 12;
pub(crate) const CMD16: u8 = 16;
pub(crate) const CMD17: u8 = 17;
pub(crate) const CMD18: u8 = 18;
pub(crate) const CMD24: u8 = 24;
pub(crate) const CMD25: u8 = 25;
pub(crate) const CMD55: u8 = 55;
pub(crate) const CMD58: u8 = 58;
// Application commands carry bit 7 and are prefixed with CMD55 on the wire.
pub(crate) const ACMD23: u8 = 0x80 | 23;
pub(crate) const ACMD41: u8 = 0x80 | 41;

pub(crate) const TOKEN_START_BLOCK: u8 = 0xFE;
pub(crate) const TOKEN_START_MULTI_WRITE: u8 = 0xFC;
pub(crate) const TOKEN_STOP_TRAN: u8 = 0xFD;

const ERASE_BLOCK_SECTORS: u32 = 128;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CardVersion {
    Mmc3,
    Sd1,
    Sd2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CardType {
    pub version: CardVersion,
    /// Commands address 512-byte blocks instead of bytes (SDHC/SDXC).
    pub block_addressing: bool,
}

impl CardType {
    pub fn is_sd(&self) -> bool {
        matches!(self.version, CardVersion::Sd1 | CardVersion::Sd2)
    }
}

/// Poll budgets used by the card driver. Defaults follow the SD
/// physical-layer timing for SPI mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CardConfig {
    pub settle_ms: u32,
    pub dummy_clock_bytes: u8,
    pub ready_polls: u32,
    pub ready_poll_us: u32,
    pub token_polls: u32,
    pub token_poll_us: u32,
    pub init_polls: u32,
    pub init_poll_us: u32,
    pub response_polls: u8,
}

impl Default for CardConfig {
    fn default() -> Self {
        Self {
            settle_ms: 10,
            dummy_clock_bytes: 10,
            ready_polls: 5000,
            ready_poll_us: 100,
            token_polls: 1000,
            token_poll_us: 100,
            init_polls: 1000,
            init_poll_us: 1000,
            response_polls: 10,
        }
    }
}

impl CardConfig {
    pub fn with_settle_ms(mut self, ms: u32) -> Self {
        self.settle_ms = ms;
        self
    }

    pub fn with_ready_wait(mut self, polls: u32, poll_us: u32) -> Self {
        self.ready_polls = polls;
        self.ready_poll_us = poll_us;
        self
    }

    pub fn with_token_wait(mut self, polls: u32, poll_us: u32) -> Self {
        self.token_polls = polls;
        self.token_poll_us = poll_us;
        self
    }

    pub fn with_init_wait(mut self, polls: u32, poll_us: u32) -> Self {
        self.init_polls = polls;
        self.init_poll_us = poll_us;
        self
    }

    pub fn with_response_polls(mut self, polls: u8) -> Self {
        self.response_polls = polls;
        self
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum CardError<E> {
    Transport(E),
    NotInitialized,
    BusyTimeout,
    CommandRejected { cmd: u8, r1: u8 },
    DataTokenTimeout(u8),
    DataTokenUnexpected { cmd: u8, token: u8 },
    WriteDataRejected(u8),
    CapacityDecodeFailed,
}

pub struct SdCard<T> {
    bus: T,
    config: CardConfig,
    status: DiskStatus,
    card_type: Option<CardType>,
}

impl<T: Transport> SdCard<T> {
    pub fn new(bus: T) -> Self {
        Self::with_config(bus, CardConfig::default())
    }

    pub fn with_config(bus: T, config: CardConfig) -> Self {
        Self {
            bus,
            config,
            status: DiskStatus::NOT_INITIALIZED,
            card_type: None,
        }
    }

    pub fn card_type(&self) -> Option<CardType> {
        self.card_type
    }

    pub fn config(&self) -> &CardConfig {
        &self.config
    }

    /// Marks the card as needing the identification handshake again, e.g.
    /// after a removal was detected.
    pub fn invalidate(&mut self) {
        self.card_type = None;
        self.status.insert(DiskStatus::NOT_INITIALIZED);
    }

    pub fn release(self) -> T {
        self.bus
    }

    fn ensure_ready(&self) -> Result<(), DiskError> {
        if self.status.contains(DiskStatus::NOT_INITIALIZED) {
            return Err(DiskError::NotReady);
        }
        Ok(())
    }
}

impl<T: Transport> BlockDevice for SdCard<T> {
    fn status(&self) -> DiskStatus {
        self.status
    }

    fn initialize(&mut self) -> DiskStatus {
        match self.identify() {
            Ok(Some(card_type)) => {
                debug!(
                    "sdcard: init_ok version={:?} block_addressing={}",
                    card_type.version, card_type.block_addressing
                );
                self.card_type = Some(card_type);
                self.status.remove(DiskStatus::NOT_INITIALIZED);
            }
            Ok(None) => {
                debug!("sdcard: init_failed no_usable_card");
                self.invalidate();
            }
            Err(err) => {
                warn!("sdcard: init_failed err={:?}", err);
                self.invalidate();
            }
        }
        self.status
    }

    fn read(&mut self, sector: u32, buf: &mut [u8]) -> Result<(), DiskError> {
        let count = disk::sector_count(buf.len())?;
        self.ensure_ready()?;
        self.read_blocks(sector, buf).map_err(|err| {
            warn!(
                "sdcard: read_failed sector={} count={} err={:?}",
                sector, count, err
            );
            DiskError::Error
        })
    }

    fn write(&mut self, sector: u32, buf: &[u8]) -> Result<(), DiskError> {
        let count = disk::sector_count(buf.len())?;
        self.ensure_ready()?;
        if self.status.contains(DiskStatus::WRITE_PROTECTED) {
            return Err(DiskError::WriteProtected);
        }
        self.write_blocks(sector, buf).map_err(|err| {
            warn!(
                "sdcard: write_failed sector={} count={} err={:?}",
                sector, count, err
            );
            DiskError::Error
        })
    }

    fn ioctl(&mut self, cmd: IoctlCommand) -> Result<u32, DiskError> {
        self.ensure_ready()?;
        let result = match cmd {
            IoctlCommand::Sync => self.sync_card().map(|_| 0),
            IoctlCommand::SectorCount => self.read_sector_count(),
            IoctlCommand::SectorSize => Ok(crate::SECTOR_SIZE as u32),
            IoctlCommand::BlockSize => Ok(ERASE_BLOCK_SECTORS),
        };
        result.map_err(|err| {
            warn!("sdcard: ioctl_failed cmd={:?} err={:?}", cmd, err);
            DiskError::Error
        })
    }
}
