use log::debug;

use super::{
    command::CardResult, CardError, CardType, CardVersion, SdCard, ACMD41, CMD0, CMD1, CMD16,
    CMD58, CMD8,
};
use crate::transport::{BusSpeed, Transport};

const IF_COND_ARG: u32 = 0x1AA;
const HCS_BIT: u32 = 1 << 30;
const OCR_CCS_BIT: u8 = 0x40;

impl<T: Transport> SdCard<T> {
    /// Runs the identification handshake. `Ok(None)` means no usable card
    /// answered within the poll budgets.
    pub(super) fn identify(&mut self) -> CardResult<Option<CardType>, T::Error> {
        self.card_type = None;
        self.bus.set_clock(BusSpeed::Init).map_err(CardError::Transport)?;
        for _ in 0..self.config.settle_ms {
            self.bus.delay_us(1000);
        }

        // At least 74 clocks with chip-select high put the card in native mode.
        self.bus.deselect().map_err(CardError::Transport)?;
        for _ in 0..self.config.dummy_clock_bytes {
            self.xfer(0xFF)?;
        }

        let mut detected = None;
        let r1 = self.send_cmd(CMD0, 0)?;
        if r1 == 0x01 {
            detected = if self.send_cmd(CMD8, IF_COND_ARG)? == 0x01 {
                self.identify_v2()?
            } else {
                self.identify_v1()?
            };
        } else {
            debug!("sdcard: cmd0 no_idle r1={:#04x}", r1);
        }
        self.deselect()?;

        if detected.is_some() {
            self.bus.set_clock(BusSpeed::Data).map_err(CardError::Transport)?;
        }
        Ok(detected)
    }

    fn identify_v2(&mut self) -> CardResult<Option<CardType>, T::Error> {
        let mut r7 = [0u8; 4];
        self.receive(&mut r7)?;
        if r7[2] != 0x01 || r7[3] != 0xAA {
            debug!("sdcard: cmd8 echo_mismatch r7={:02x?}", r7);
            return Ok(None);
        }
        if !self.leave_idle(ACMD41, HCS_BIT)? {
            debug!("sdcard: acmd41 idle_timeout");
            return Ok(None);
        }
        if self.send_cmd(CMD58, 0)? != 0 {
            return Ok(None);
        }
        let mut ocr = [0u8; 4];
        self.receive(&mut ocr)?;
        Ok(Some(CardType {
            version: CardVersion::Sd2,
            block_addressing: ocr[0] & OCR_CCS_BIT != 0,
        }))
    }

    fn identify_v1(&mut self) -> CardResult<Option<CardType>, T::Error> {
        let (version, init_cmd) = if self.send_cmd(ACMD41, 0)? <= 1 {
            (CardVersion::Sd1, ACMD41)
        } else {
            (CardVersion::Mmc3, CMD1)
        };
        if !self.leave_idle(init_cmd, 0)? {
            debug!("sdcard: {:?} idle_timeout", version);
            return Ok(None);
        }
        if self.send_cmd(CMD16, crate::SECTOR_SIZE as u32)? != 0 {
            return Ok(None);
        }
        Ok(Some(CardType {
            version,
            block_addressing: false,
        }))
    }

    fn leave_idle(&mut self, cmd: u8, arg: u32) -> CardResult<bool, T::Error> {
        for _ in 0..self.config.init_polls {
            if self.send_cmd(cmd, arg)? == 0 {
                return Ok(true);
            }
            self.bus.delay_us(self.config.init_poll_us);
        }
        Ok(false)
    }
}
