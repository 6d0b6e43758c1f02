use log::trace;

use super::{CardError, SdCard, CMD0, CMD12, CMD55, CMD8};
use crate::transport::Transport;

pub(super) type CardResult<T, E> = Result<T, CardError<E>>;

pub(super) fn command_frame(cmd: u8, arg: u32) -> [u8; 6] {
    let crc = match cmd {
        CMD0 => 0x95,
        CMD8 => 0x87,
        _ => 0x01,
    };
    [
        0x40 | cmd,
        (arg >> 24) as u8,
        (arg >> 16) as u8,
        (arg >> 8) as u8,
        arg as u8,
        crc,
    ]
}

impl<T: Transport> SdCard<T> {
    pub(super) fn xfer(&mut self, byte: u8) -> CardResult<u8, T::Error> {
        self.bus.transfer(byte).map_err(CardError::Transport)
    }

    pub(super) fn receive(&mut self, buf: &mut [u8]) -> CardResult<(), T::Error> {
        for slot in buf.iter_mut() {
            *slot = self.xfer(0xFF)?;
        }
        Ok(())
    }

    pub(super) fn send(&mut self, data: &[u8]) -> CardResult<(), T::Error> {
        for &byte in data {
            self.xfer(byte)?;
        }
        Ok(())
    }

    pub(super) fn wait_ready(&mut self) -> CardResult<bool, T::Error> {
        for _ in 0..self.config.ready_polls {
            if self.xfer(0xFF)? == 0xFF {
                return Ok(true);
            }
            self.bus.delay_us(self.config.ready_poll_us);
        }
        Ok(false)
    }

    /// Releases chip-select and clocks one extra byte so the card lets go of
    /// the data-out line.
    pub(super) fn deselect(&mut self) -> CardResult<(), T::Error> {
        self.bus.deselect().map_err(CardError::Transport)?;
        self.xfer(0xFF)?;
        Ok(())
    }

    pub(super) fn select(&mut self) -> CardResult<(), T::Error> {
        self.bus.select().map_err(CardError::Transport)?;
        self.xfer(0xFF)?;
        if self.wait_ready()? {
            return Ok(());
        }
        self.deselect()?;
        Err(CardError::BusyTimeout)
    }

    /// Sends one command and returns its R1 byte. A card that never becomes
    /// ready, or never answers, yields 0xFF.
    pub(super) fn send_cmd(&mut self, cmd: u8, arg: u32) -> CardResult<u8, T::Error> {
        let mut cmd = cmd;
        if cmd & 0x80 != 0 {
            cmd &= 0x7F;
            let r1 = self.send_cmd(CMD55, 0)?;
            if r1 > 1 {
                return Ok(r1);
            }
        }

        if cmd != CMD12 {
            self.deselect()?;
            match self.select() {
                Ok(()) => {}
                Err(CardError::BusyTimeout) => {
                    trace!("sdcard: cmd{} select_timeout", cmd);
                    return Ok(0xFF);
                }
                Err(err) => return Err(err),
            }
        }

        self.send(&command_frame(cmd, arg))?;

        if cmd == CMD12 {
            // Skip the stuff byte that follows a stop command.
            self.xfer(0xFF)?;
        }

        let mut r1 = 0xFF;
        for _ in 0..self.config.response_polls {
            r1 = self.xfer(0xFF)?;
            if r1 & 0x80 == 0 {
                break;
            }
        }
        trace!("sdcard: cmd{} arg={:#010x} r1={:#04x}", cmd, arg, r1);
        Ok(r1)
    }
}
