use log::trace;

use super::{
    ld_dword, ld_word, st_dword, st_word, volume::Volume, FatError, FatResult, FatType,
    SECTOR_BYTES,
};
use crate::disk::BlockDevice;

/// End-of-chain marker; truncated to the entry width when stored.
pub(crate) const EOC: u32 = 0xFFFF_FFFF;

impl<D: BlockDevice> Volume<D> {
    /// Reads the FAT entry of `clst`. A raw value of 1 is never valid on
    /// disk and is reported as an internal error.
    pub(crate) fn get_fat(&mut self, clst: u32) -> FatResult<u32> {
        if clst < 2 || clst >= self.n_fatent {
            return Err(FatError::Internal);
        }
        let value = match self.fat_type()? {
            FatType::Fat12 => {
                let bc = clst + clst / 2;
                self.move_window(self.fatbase + bc / SECTOR_BYTES)?;
                let lo = self.win.buf[(bc % SECTOR_BYTES) as usize];
                let bc = bc + 1;
                self.move_window(self.fatbase + bc / SECTOR_BYTES)?;
                let hi = self.win.buf[(bc % SECTOR_BYTES) as usize];
                let wc = u32::from(u16::from_le_bytes([lo, hi]));
                if clst & 1 != 0 {
                    wc >> 4
                } else {
                    wc & 0x0FFF
                }
            }
            FatType::Fat16 => {
                self.move_window(self.fatbase + clst / (SECTOR_BYTES / 2))?;
                u32::from(ld_word(&self.win.buf, (clst * 2 % SECTOR_BYTES) as usize))
            }
            FatType::Fat32 => {
                self.move_window(self.fatbase + clst / (SECTOR_BYTES / 4))?;
                ld_dword(&self.win.buf, (clst * 4 % SECTOR_BYTES) as usize) & 0x0FFF_FFFF
            }
        };
        if value == 1 {
            return Err(FatError::Internal);
        }
        Ok(value)
    }

    pub(crate) fn put_fat(&mut self, clst: u32, value: u32) -> FatResult<()> {
        if clst < 2 || clst >= self.n_fatent {
            return Err(FatError::Internal);
        }
        match self.fat_type()? {
            FatType::Fat12 => {
                let odd = clst & 1 != 0;
                let bc = clst + clst / 2;
                self.move_window(self.fatbase + bc / SECTOR_BYTES)?;
                let p = (bc % SECTOR_BYTES) as usize;
                self.win.buf[p] = if odd {
                    (self.win.buf[p] & 0x0F) | ((value as u8) << 4)
                } else {
                    value as u8
                };
                self.win.dirty = true;

                let bc = bc + 1;
                self.move_window(self.fatbase + bc / SECTOR_BYTES)?;
                let p = (bc % SECTOR_BYTES) as usize;
                self.win.buf[p] = if odd {
                    (value >> 4) as u8
                } else {
                    (self.win.buf[p] & 0xF0) | ((value >> 8) as u8 & 0x0F)
                };
            }
            FatType::Fat16 => {
                self.move_window(self.fatbase + clst / (SECTOR_BYTES / 2))?;
                st_word(&mut self.win.buf, (clst * 2 % SECTOR_BYTES) as usize, value as u16);
            }
            FatType::Fat32 => {
                self.move_window(self.fatbase + clst / (SECTOR_BYTES / 4))?;
                let p = (clst * 4 % SECTOR_BYTES) as usize;
                let kept = ld_dword(&self.win.buf, p) & 0xF000_0000;
                st_dword(&mut self.win.buf, p, (value & 0x0FFF_FFFF) | kept);
            }
        }
        self.win.dirty = true;
        Ok(())
    }

    /// Frees the chain starting at `clst`. When `pclst` is given, that
    /// cluster becomes the new end of the chain.
    pub(crate) fn remove_chain(&mut self, clst: u32, pclst: Option<u32>) -> FatResult<()> {
        if clst < 2 || clst >= self.n_fatent {
            return Err(FatError::Internal);
        }
        if let Some(prev) = pclst {
            self.put_fat(prev, EOC)?;
        }
        let mut clst = clst;
        loop {
            let next = self.get_fat(clst)?;
            if next == 0 {
                break;
            }
            self.put_fat(clst, 0)?;
            if let Some(free) = self.free_clst {
                if free < self.n_fatent - 2 {
                    self.free_clst = Some(free + 1);
                    self.fsi_dirty = true;
                }
            }
            clst = next;
            if clst >= self.n_fatent {
                break;
            }
        }
        Ok(())
    }

    /// Allocates one cluster. With `clst == 0` a new chain is started;
    /// otherwise the chain ending at `clst` is stretched, or its existing
    /// successor returned. `Ok(None)` means the volume is full.
    pub(crate) fn create_chain(&mut self, clst: u32) -> FatResult<Option<u32>> {
        let mut start;
        if clst == 0 {
            start = self.last_clst;
            if start == 0 || start >= self.n_fatent {
                start = 1;
            }
        } else {
            let next = self.get_fat(clst)?;
            if next < 2 {
                return Err(FatError::Internal);
            }
            if next < self.n_fatent {
                return Ok(Some(next));
            }
            start = clst;
        }
        if self.free_clst == Some(0) {
            return Ok(None);
        }

        let mut candidate = 0;
        if start == clst {
            candidate = start + 1;
            if candidate >= self.n_fatent {
                candidate = 2;
            }
            if self.get_fat(candidate)? != 0 {
                let hint = self.last_clst;
                if hint >= 2 && hint < self.n_fatent {
                    start = hint;
                }
                candidate = 0;
            }
        }
        if candidate == 0 {
            candidate = start;
            loop {
                candidate += 1;
                if candidate >= self.n_fatent {
                    candidate = 2;
                    if candidate > start {
                        return Ok(None);
                    }
                }
                if self.get_fat(candidate)? == 0 {
                    break;
                }
                if candidate == start {
                    return Ok(None);
                }
            }
        }

        self.put_fat(candidate, EOC)?;
        if clst != 0 {
            self.put_fat(clst, candidate)?;
        }
        self.last_clst = candidate;
        if let Some(free) = self.free_clst {
            if free <= self.n_fatent - 2 {
                self.free_clst = Some(free.saturating_sub(1));
            }
        }
        self.fsi_dirty = true;
        trace!("fat: cluster_allocated clst={} prev={}", candidate, clst);
        Ok(Some(candidate))
    }

    /// Counts free clusters by scanning the whole FAT.
    pub(crate) fn count_free(&mut self) -> FatResult<u32> {
        let mut free = 0;
        match self.fat_type()? {
            FatType::Fat12 => {
                for clst in 2..self.n_fatent {
                    if self.get_fat(clst)? == 0 {
                        free += 1;
                    }
                }
            }
            fat_type => {
                let width = if fat_type == FatType::Fat16 { 2 } else { 4 };
                let mut sect = self.fatbase;
                let mut ofs = 0;
                for _ in 0..self.n_fatent {
                    if ofs == 0 {
                        self.move_window(sect)?;
                        sect += 1;
                    }
                    let entry = if width == 2 {
                        u32::from(ld_word(&self.win.buf, ofs))
                    } else {
                        ld_dword(&self.win.buf, ofs) & 0x0FFF_FFFF
                    };
                    if entry == 0 {
                        free += 1;
                    }
                    ofs = (ofs + width) % SECTOR_BYTES as usize;
                }
            }
        }
        Ok(free)
    }
}
