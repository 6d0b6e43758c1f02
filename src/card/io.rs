use super::{
    command::CardResult, csd, CardError, SdCard, ACMD23, CMD12, CMD17, CMD18, CMD24, CMD25, CMD9,
    TOKEN_START_BLOCK, TOKEN_START_MULTI_WRITE, TOKEN_STOP_TRAN,
};
use crate::{transport::Transport, SECTOR_SIZE};

const DATA_ACCEPTED: u8 = 0x05;

impl<T: Transport> SdCard<T> {
    fn block_arg(&self, sector: u32) -> CardResult<u32, T::Error> {
        let card = self.card_type.ok_or(CardError::NotInitialized)?;
        Ok(if card.block_addressing {
            sector
        } else {
            sector.wrapping_mul(SECTOR_SIZE as u32)
        })
    }

    pub(super) fn read_blocks(&mut self, sector: u32, buf: &mut [u8]) -> CardResult<(), T::Error> {
        let arg = self.block_arg(sector)?;
        let cmd = if buf.len() > SECTOR_SIZE { CMD18 } else { CMD17 };
        let result = self.read_run(cmd, arg, buf);
        let released = self.deselect();
        result.and(released)
    }

    fn read_run(&mut self, cmd: u8, arg: u32, buf: &mut [u8]) -> CardResult<(), T::Error> {
        let r1 = self.send_cmd(cmd, arg)?;
        if r1 != 0 {
            return Err(CardError::CommandRejected { cmd, r1 });
        }
        let mut outcome = Ok(());
        for block in buf.chunks_exact_mut(SECTOR_SIZE) {
            if let Err(err) = self.receive_datablock(cmd, block) {
                outcome = Err(err);
                break;
            }
        }
        if cmd == CMD18 {
            self.send_cmd(CMD12, 0)?;
        }
        outcome
    }

    pub(super) fn write_blocks(&mut self, sector: u32, buf: &[u8]) -> CardResult<(), T::Error> {
        let arg = self.block_arg(sector)?;
        let result = self.write_run(arg, buf);
        let released = self.deselect();
        result.and(released)
    }

    fn write_run(&mut self, arg: u32, buf: &[u8]) -> CardResult<(), T::Error> {
        let count = buf.len() / SECTOR_SIZE;
        if count == 1 {
            let r1 = self.send_cmd(CMD24, arg)?;
            if r1 != 0 {
                return Err(CardError::CommandRejected { cmd: CMD24, r1 });
            }
            return self.transmit_datablock(Some(buf), TOKEN_START_BLOCK);
        }

        if self.card_type.is_some_and(|card| card.is_sd()) {
            // Pre-erase hint; the transfer works without it.
            self.send_cmd(ACMD23, count as u32)?;
        }
        let r1 = self.send_cmd(CMD25, arg)?;
        if r1 != 0 {
            return Err(CardError::CommandRejected { cmd: CMD25, r1 });
        }
        let mut outcome = Ok(());
        for block in buf.chunks_exact(SECTOR_SIZE) {
            if let Err(err) = self.transmit_datablock(Some(block), TOKEN_START_MULTI_WRITE) {
                outcome = Err(err);
                break;
            }
        }
        let stopped = self.transmit_datablock(None, TOKEN_STOP_TRAN);
        outcome.and(stopped)
    }

    fn receive_datablock(&mut self, cmd: u8, buf: &mut [u8]) -> CardResult<(), T::Error> {
        let mut token = 0xFF;
        for _ in 0..self.config.token_polls {
            token = self.xfer(0xFF)?;
            if token != 0xFF {
                break;
            }
            self.bus.delay_us(self.config.token_poll_us);
        }
        match token {
            TOKEN_START_BLOCK => {}
            0xFF => return Err(CardError::DataTokenTimeout(cmd)),
            token => return Err(CardError::DataTokenUnexpected { cmd, token }),
        }
        self.receive(buf)?;
        // CRC16 is not checked in SPI mode.
        self.xfer(0xFF)?;
        self.xfer(0xFF)?;
        Ok(())
    }

    /// Sends one token, followed by a 512-byte block unless `data` is `None`
    /// (stop-transmission token).
    fn transmit_datablock(&mut self, data: Option<&[u8]>, token: u8) -> CardResult<(), T::Error> {
        if !self.wait_ready()? {
            return Err(CardError::BusyTimeout);
        }
        self.xfer(token)?;
        let Some(data) = data else {
            return Ok(());
        };
        self.send(data)?;
        self.xfer(0xFF)?;
        self.xfer(0xFF)?;
        let response = self.xfer(0xFF)? & 0x1F;
        if response != DATA_ACCEPTED {
            return Err(CardError::WriteDataRejected(response));
        }
        Ok(())
    }

    pub(super) fn sync_card(&mut self) -> CardResult<(), T::Error> {
        let selected = self.select();
        let released = self.deselect();
        selected.and(released)
    }

    pub(super) fn read_sector_count(&mut self) -> CardResult<u32, T::Error> {
        let result = self.read_csd();
        let released = self.deselect();
        let csd = result?;
        released?;
        csd::sector_count(&csd).ok_or(CardError::CapacityDecodeFailed)
    }

    fn read_csd(&mut self) -> CardResult<[u8; 16], T::Error> {
        let r1 = self.send_cmd(CMD9, 0)?;
        if r1 != 0 {
            return Err(CardError::CommandRejected { cmd: CMD9, r1 });
        }
        let mut csd = [0u8; 16];
        self.receive_datablock(CMD9, &mut csd)?;
        Ok(csd)
    }
}
