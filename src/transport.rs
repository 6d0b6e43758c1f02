use core::fmt::Debug;

use embedded_hal::{delay::DelayNs, digital::OutputPin, spi::SpiBus};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusSpeed {
    /// Card identification clock (100-400 kHz).
    Init,
    /// Full data-transfer clock.
    Data,
}

/// Byte-oriented full-duplex serial bus with a chip-select line.
///
/// `transfer` shifts one byte out and returns the byte clocked in at the same
/// time. Every card command and data block goes through it one byte at a time.
pub trait Transport {
    type Error: Debug;

    fn transfer(&mut self, byte: u8) -> Result<u8, Self::Error>;
    fn select(&mut self) -> Result<(), Self::Error>;
    fn deselect(&mut self) -> Result<(), Self::Error>;
    fn delay_us(&mut self, us: u32);

    fn set_clock(&mut self, speed: BusSpeed) -> Result<(), Self::Error> {
        let _ = speed;
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum TransportError<S, P> {
    Spi(S),
    Pin(P),
}

/// `Transport` over an `embedded-hal` SPI bus, a chip-select pin and a delay.
///
/// The bus clock is left as configured by the caller; implement `Transport`
/// directly when the HAL can retune the clock between identification and
/// data transfer.
pub struct SpiTransport<SPI, CS, D> {
    spi: SPI,
    cs: CS,
    delay: D,
}

impl<SPI, CS, D> SpiTransport<SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    pub fn new(spi: SPI, cs: CS, delay: D) -> Self {
        Self { spi, cs, delay }
    }

    pub fn release(self) -> (SPI, CS, D) {
        (self.spi, self.cs, self.delay)
    }
}

impl<SPI, CS, D> Transport for SpiTransport<SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    type Error = TransportError<SPI::Error, CS::Error>;

    fn transfer(&mut self, byte: u8) -> Result<u8, Self::Error> {
        let mut frame = [byte];
        self.spi
            .transfer_in_place(&mut frame)
            .map_err(TransportError::Spi)?;
        Ok(frame[0])
    }

    fn select(&mut self) -> Result<(), Self::Error> {
        self.cs.set_low().map_err(TransportError::Pin)
    }

    fn deselect(&mut self) -> Result<(), Self::Error> {
        self.spi.flush().map_err(TransportError::Spi)?;
        self.cs.set_high().map_err(TransportError::Pin)
    }

    fn delay_us(&mut self, us: u32) {
        self.delay.delay_us(us);
    }
}
