//! Byte-level simulation of an SD/MMC card in SPI mode.

use std::collections::VecDeque;
use std::convert::Infallible;

use spi_fatfs::{BusSpeed, Transport, SECTOR_SIZE};

use super::Image;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CardKind {
    SdV2 { high_capacity: bool },
    SdV1,
    Mmc,
    Absent,
}

const R1_IDLE: u8 = 0x01;
const R1_ILLEGAL: u8 = 0x04;
const R1_ADDRESS: u8 = 0x20;

#[derive(Clone, Debug, PartialEq, Eq)]
enum WriteState {
    Idle,
    AwaitToken { lba: u32, multi: bool },
    Receiving { lba: u32, multi: bool, data: Vec<u8> },
}

#[derive(Debug)]
pub struct FakeCard {
    pub kind: CardKind,
    pub image: Image,
    /// Commands as received; application commands carry bit 7.
    pub commands: Vec<(u8, u32)>,
    pub clock_changes: Vec<BusSpeed>,
    pub waited_us: u64,
    /// Number of ACMD41/CMD1 polls answered with "still idle".
    pub idle_polls: u32,
    /// Busy bytes reported after every accepted write block.
    pub busy_after_write: u32,
    pub reject_writes: bool,
    pub read_token: u8,
    /// Zero-based block of a CMD18/CMD25 run that fails: an error token
    /// for reads, a rejected data response for writes.
    pub fail_block: Option<usize>,
    pub blocks_read: usize,
    pub blocks_written: usize,
    pub stop_tokens: usize,
    run_block: usize,
    selected: bool,
    idle: bool,
    app_cmd: bool,
    idle_left: u32,
    busy: u32,
    frame: Vec<u8>,
    out: VecDeque<u8>,
    stream: Option<u32>,
    write: WriteState,
}

impl FakeCard {
    pub fn new(kind: CardKind, image: Image) -> Self {
        Self {
            kind,
            image,
            commands: Vec::new(),
            clock_changes: Vec::new(),
            waited_us: 0,
            idle_polls: 2,
            busy_after_write: 3,
            reject_writes: false,
            read_token: 0xFE,
            fail_block: None,
            blocks_read: 0,
            blocks_written: 0,
            stop_tokens: 0,
            run_block: 0,
            selected: false,
            idle: false,
            app_cmd: false,
            idle_left: 0,
            busy: 0,
            frame: Vec::new(),
            out: VecDeque::new(),
            stream: None,
            write: WriteState::Idle,
        }
    }

    pub fn sdhc(image: Image) -> Self {
        Self::new(CardKind::SdV2 { high_capacity: true }, image)
    }

    pub fn sdsc(image: Image) -> Self {
        Self::new(CardKind::SdV2 { high_capacity: false }, image)
    }

    pub fn high_capacity(&self) -> bool {
        matches!(self.kind, CardKind::SdV2 { high_capacity: true })
    }

    pub fn command_ids(&self) -> Vec<u8> {
        self.commands.iter().map(|&(cmd, _)| cmd).collect()
    }

    pub fn clear_log(&mut self) {
        self.commands.clear();
        self.blocks_read = 0;
        self.blocks_written = 0;
        self.stop_tokens = 0;
    }

    fn respond(&mut self, bytes: &[u8]) {
        // One byte of command response latency.
        self.out.push_back(0xFF);
        self.out.extend(bytes);
    }

    fn r1(&self) -> u8 {
        if self.idle {
            R1_IDLE
        } else {
            0
        }
    }

    fn lba(&self, arg: u32) -> Option<u32> {
        let lba = if self.high_capacity() {
            arg
        } else {
            if arg as usize % SECTOR_SIZE != 0 {
                return None;
            }
            arg / SECTOR_SIZE as u32
        };
        (lba < self.image.total_sectors).then_some(lba)
    }

    fn queue_block(&mut self, lba: u32) {
        self.out.push_back(0xFF);
        self.out.push_back(self.read_token);
        self.out.extend(self.image.sector(lba));
        self.out.extend([0xFF, 0xFF]);
        self.blocks_read += 1;
    }

    fn csd(&self) -> [u8; 16] {
        let mut csd = [0u8; 16];
        if self.high_capacity() {
            // CSD v2: C_SIZE counts 512 KiB units.
            let c_size = self.image.total_sectors / 1024 - 1;
            csd[0] = 0x40;
            csd[7] = ((c_size >> 16) & 0x3F) as u8;
            csd[8] = (c_size >> 8) as u8;
            csd[9] = c_size as u8;
        } else {
            // CSD v1 with READ_BL_LEN 9 and C_SIZE_MULT 7.
            let c_size = self.image.total_sectors / 512 - 1;
            csd[5] = 0x09;
            csd[6] = ((c_size >> 10) & 0x03) as u8;
            csd[7] = (c_size >> 2) as u8;
            csd[8] = ((c_size & 0x03) << 6) as u8;
            csd[9] = 0x03;
            csd[10] = 0x80;
        }
        csd
    }

    fn command(&mut self, frame: [u8; 6]) {
        let index = frame[0] & 0x3F;
        let arg = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
        let app = std::mem::take(&mut self.app_cmd);
        let logged = if app && index != 55 { 0x80 | index } else { index };
        self.commands.push((logged, arg));

        match (index, app) {
            (0, _) => {
                if frame[5] != 0x95 {
                    return;
                }
                self.idle = true;
                self.idle_left = self.idle_polls;
                self.write = WriteState::Idle;
                self.stream = None;
                self.respond(&[R1_IDLE]);
            }
            (8, _) => match self.kind {
                CardKind::SdV2 { .. } if frame[5] == 0x87 => {
                    let r1 = self.r1();
                    self.respond(&[r1, 0x00, 0x00, frame[3] & 0x0F, frame[4]]);
                }
                CardKind::SdV2 { .. } => {}
                _ => self.respond(&[R1_IDLE | R1_ILLEGAL]),
            },
            (55, _) if self.kind == CardKind::Mmc => self.respond(&[R1_IDLE | R1_ILLEGAL]),
            (55, _) => {
                self.app_cmd = true;
                let r1 = self.r1();
                self.respond(&[r1]);
            }
            (41, true) | (1, false) => {
                if self.idle_left > 0 {
                    self.idle_left -= 1;
                } else {
                    self.idle = false;
                }
                let r1 = self.r1();
                self.respond(&[r1]);
            }
            (58, false) => {
                let ccs = if self.high_capacity() { 0x40 } else { 0x00 };
                let r1 = self.r1();
                self.respond(&[r1, 0x80 | ccs, 0xFF, 0x80, 0x00]);
            }
            _ if self.idle => self.respond(&[R1_IDLE]),
            (16, false) => self.respond(&[0x00]),
            (23, true) => self.respond(&[0x00]),
            (9, false) => {
                self.respond(&[0x00]);
                let csd = self.csd();
                self.out.extend([0xFF, 0xFE]);
                self.out.extend(csd);
                self.out.extend([0xFF, 0xFF]);
            }
            (17, false) | (18, false) => match self.lba(arg) {
                Some(lba) => {
                    self.respond(&[0x00]);
                    self.run_block = 0;
                    if index == 17 {
                        self.queue_block(lba);
                    } else {
                        self.stream = Some(lba);
                    }
                }
                None => self.respond(&[R1_ADDRESS]),
            },
            (12, false) => {
                // The block already streaming while the stop frame came in
                // was never consumed by the host.
                if self.stream.take().is_some() && !self.out.is_empty() {
                    self.blocks_read -= 1;
                }
                self.out.clear();
                // Stuff byte, then R1.
                self.out.extend([0xFF, 0x00]);
            }
            (24, false) | (25, false) => match self.lba(arg) {
                Some(lba) => {
                    self.respond(&[0x00]);
                    self.run_block = 0;
                    self.write = WriteState::AwaitToken {
                        lba,
                        multi: index == 25,
                    };
                }
                None => self.respond(&[R1_ADDRESS]),
            },
            _ => self.respond(&[R1_ILLEGAL]),
        }
    }

    /// Consumes a byte sent by the host while a write transaction is open.
    /// Returns false when the byte belongs to the command layer instead.
    fn write_byte(&mut self, byte: u8) -> bool {
        match std::mem::replace(&mut self.write, WriteState::Idle) {
            WriteState::Idle => false,
            WriteState::AwaitToken { lba, multi } => {
                self.write = match (byte, multi) {
                    (0xFE, false) | (0xFC, true) => WriteState::Receiving {
                        lba,
                        multi,
                        data: Vec::with_capacity(SECTOR_SIZE + 2),
                    },
                    (0xFD, true) => {
                        self.stop_tokens += 1;
                        self.busy = self.busy_after_write;
                        WriteState::Idle
                    }
                    _ => WriteState::AwaitToken { lba, multi },
                };
                true
            }
            WriteState::Receiving {
                lba,
                multi,
                mut data,
            } => {
                data.push(byte);
                if data.len() < SECTOR_SIZE + 2 {
                    self.write = WriteState::Receiving { lba, multi, data };
                    return true;
                }
                let in_range = lba < self.image.total_sectors;
                let failed = multi && self.fail_block == Some(self.run_block);
                if self.reject_writes || !in_range || failed {
                    self.out.push_back(0x0D);
                    // A multi-block write still expects the stop token.
                    self.write = if multi {
                        WriteState::AwaitToken { lba, multi }
                    } else {
                        WriteState::Idle
                    };
                } else {
                    self.run_block += 1;
                    self.image.put(lba, &data[..SECTOR_SIZE]);
                    self.blocks_written += 1;
                    self.out.push_back(0x05);
                    self.write = if multi {
                        WriteState::AwaitToken {
                            lba: lba + 1,
                            multi,
                        }
                    } else {
                        WriteState::Idle
                    };
                }
                self.busy = self.busy_after_write;
                true
            }
        }
    }

    fn next_out(&mut self) -> u8 {
        if let Some(byte) = self.out.pop_front() {
            return byte;
        }
        if self.busy > 0 {
            self.busy -= 1;
            return 0x00;
        }
        if let Some(lba) = self.stream {
            if self.fail_block == Some(self.run_block) {
                // Data error token; the card stops streaming.
                self.stream = None;
                self.out.extend([0xFF, 0x08]);
                return self.out.pop_front().unwrap_or(0xFF);
            }
            if lba < self.image.total_sectors {
                self.run_block += 1;
                self.queue_block(lba);
                self.stream = Some(lba + 1);
                return self.out.pop_front().unwrap_or(0xFF);
            }
        }
        0xFF
    }
}

impl Transport for FakeCard {
    type Error = Infallible;

    fn transfer(&mut self, byte: u8) -> Result<u8, Infallible> {
        if self.kind == CardKind::Absent || !self.selected {
            return Ok(0xFF);
        }
        let reply = self.next_out();
        if self.write_byte(byte) {
            return Ok(reply);
        }
        if self.frame.is_empty() && byte & 0xC0 != 0x40 {
            return Ok(reply);
        }
        self.frame.push(byte);
        if self.frame.len() == 6 {
            let mut frame = [0u8; 6];
            frame.copy_from_slice(&self.frame);
            self.frame.clear();
            self.command(frame);
        }
        Ok(reply)
    }

    fn select(&mut self) -> Result<(), Infallible> {
        self.selected = true;
        Ok(())
    }

    fn deselect(&mut self) -> Result<(), Infallible> {
        self.selected = false;
        self.frame.clear();
        self.out.clear();
        Ok(())
    }

    fn delay_us(&mut self, us: u32) {
        self.waited_us += u64::from(us);
    }

    fn set_clock(&mut self, speed: BusSpeed) -> Result<(), Infallible> {
        self.clock_changes.push(speed);
        Ok(())
    }
}
