use super::{
    ld_dword, ld_word,
    name::{self, NameStatus, SfnBuf},
    st_word,
    volume::Volume,
    Attr, FatError, FatResult, FileInfo, DIR_ATTR, DIR_ENTRY_SIZE, DIR_FILE_SIZE, DIR_FST_CLUS_HI,
    DIR_FST_CLUS_LO, DIR_MOD_TIME, DIR_NAME, ENTRY_DELETED, MAX_DIR_BYTES, SECTOR_BYTES,
};
use crate::disk::BlockDevice;

/// Position inside a directory table plus the name being looked up.
#[derive(Clone, Copy, Debug)]
pub(crate) struct DirCursor {
    /// First cluster of the table; 0 is the root directory.
    pub(crate) sclust: u32,
    /// Byte offset of the current entry from the start of the table.
    pub(crate) offset: u32,
    pub(crate) clust: u32,
    /// Sector holding the current entry; 0 once the table end was reached.
    pub(crate) sect: u32,
    /// Attribute byte of the last matched entry.
    pub(crate) attr: u8,
    pub(crate) sfn: SfnBuf,
}

/// Stores a start cluster into a raw entry; the high half only exists on
/// FAT32.
pub(crate) fn st_clust(entry: &mut [u8], clst: u32, fat32: bool) {
    st_word(entry, DIR_FST_CLUS_LO, clst as u16);
    if fat32 {
        st_word(entry, DIR_FST_CLUS_HI, (clst >> 16) as u16);
    }
}

impl DirCursor {
    pub(crate) const fn new() -> Self {
        Self {
            sclust: 0,
            offset: 0,
            clust: 0,
            sect: 0,
            attr: 0,
            sfn: SfnBuf::empty(),
        }
    }

    pub(crate) fn win_ofs(&self) -> usize {
        (self.offset % SECTOR_BYTES) as usize
    }

    pub(crate) fn status(&self) -> NameStatus {
        self.sfn.status
    }
}

impl<D: BlockDevice> Volume<D> {
    pub(crate) fn ld_clust(&self, entry: &[u8]) -> u32 {
        let mut clst = u32::from(ld_word(entry, DIR_FST_CLUS_LO));
        if self.is_fat32() {
            clst |= u32::from(ld_word(entry, DIR_FST_CLUS_HI)) << 16;
        }
        clst
    }

    /// Entry under the cursor inside the window.
    pub(crate) fn entry(&self, dp: &DirCursor) -> &[u8] {
        let ofs = dp.win_ofs();
        &self.win.buf[ofs..ofs + DIR_ENTRY_SIZE as usize]
    }

    pub(crate) fn entry_mut(&mut self, dp: &DirCursor) -> &mut [u8] {
        let ofs = dp.win_ofs();
        &mut self.win.buf[ofs..ofs + DIR_ENTRY_SIZE as usize]
    }

    /// Positions the cursor at byte offset `ofs` of its table.
    pub(crate) fn dir_sdi(&mut self, dp: &mut DirCursor, ofs: u32) -> FatResult<()> {
        if ofs >= MAX_DIR_BYTES || ofs % DIR_ENTRY_SIZE != 0 {
            return Err(FatError::Internal);
        }
        dp.offset = ofs;
        let mut clst = dp.sclust;
        if clst == 0 && self.is_fat32() {
            clst = self.dirbase;
        }

        let mut ofs = ofs;
        let sect = if clst == 0 {
            if ofs / DIR_ENTRY_SIZE >= self.n_rootdir {
                return Err(FatError::Internal);
            }
            self.dirbase
        } else {
            let cluster_bytes = self.sectors_per_cluster * SECTOR_BYTES;
            while ofs >= cluster_bytes {
                clst = self.get_fat(clst)?;
                if clst < 2 || clst >= self.n_fatent {
                    return Err(FatError::Internal);
                }
                ofs -= cluster_bytes;
            }
            self.clst2sect(clst)
        };
        dp.clust = clst;
        if sect == 0 {
            return Err(FatError::Internal);
        }
        dp.sect = sect + ofs / SECTOR_BYTES;
        Ok(())
    }

    /// Advances the cursor one entry. `Err(NoFile)` marks the end of the
    /// table; with `stretch` a full cluster-chained table grows by one
    /// zeroed cluster instead.
    pub(crate) fn dir_next(&mut self, dp: &mut DirCursor, stretch: bool) -> FatResult<()> {
        let ofs = dp.offset + DIR_ENTRY_SIZE;
        if dp.sect == 0 {
            return Err(FatError::NoFile);
        }
        if ofs >= MAX_DIR_BYTES {
            dp.sect = 0;
            return Err(FatError::NoFile);
        }

        if ofs % SECTOR_BYTES == 0 {
            dp.sect += 1;
            if dp.clust == 0 {
                if ofs / DIR_ENTRY_SIZE >= self.n_rootdir {
                    dp.sect = 0;
                    return Err(FatError::NoFile);
                }
            } else if (ofs / SECTOR_BYTES) & (self.sectors_per_cluster - 1) == 0 {
                let mut clst = self.get_fat(dp.clust)?;
                if clst < 2 {
                    return Err(FatError::Internal);
                }
                if clst >= self.n_fatent {
                    if !stretch {
                        dp.sect = 0;
                        return Err(FatError::NoFile);
                    }
                    clst = self.create_chain(dp.clust)?.ok_or(FatError::Denied)?;
                    self.dir_clear(clst)?;
                }
                dp.clust = clst;
                dp.sect = self.clst2sect(clst);
            }
        }
        dp.offset = ofs;
        Ok(())
    }

    /// Zero-fills every sector of `clst`, leaving the window on its first
    /// sector.
    pub(crate) fn dir_clear(&mut self, clst: u32) -> FatResult<()> {
        self.sync_window()?;
        let sect = self.clst2sect(clst);
        if sect == 0 {
            return Err(FatError::Internal);
        }
        self.win.sector = sect;
        self.win.buf.fill(0);
        for n in 0..self.sectors_per_cluster {
            self.disk.write(sect + n, &self.win.buf)?;
        }
        Ok(())
    }

    /// Finds `nent` consecutive free entries, growing the table if needed.
    /// The cursor is left on the last of them.
    pub(crate) fn dir_alloc(&mut self, dp: &mut DirCursor, nent: u32) -> FatResult<()> {
        self.dir_sdi(dp, 0)?;
        let mut run = 0;
        loop {
            self.move_window(dp.sect)?;
            let c = self.entry(dp)[DIR_NAME];
            if c == ENTRY_DELETED || c == 0 {
                run += 1;
                if run == nent {
                    return Ok(());
                }
            } else {
                run = 0;
            }
            match self.dir_next(dp, true) {
                Ok(()) => {}
                Err(FatError::NoFile) => return Err(FatError::Denied),
                Err(err) => return Err(err),
            }
        }
    }

    /// Scans the table for the 8.3 name held in the cursor.
    pub(crate) fn dir_find(&mut self, dp: &mut DirCursor) -> FatResult<()> {
        self.dir_sdi(dp, 0)?;
        loop {
            self.move_window(dp.sect)?;
            let entry = self.entry(dp);
            let c = entry[DIR_NAME];
            if c == 0 {
                return Err(FatError::NoFile);
            }
            dp.attr = entry[DIR_ATTR] & Attr::MASK;
            if entry[DIR_ATTR] & Attr::VOLUME.bits() == 0 && entry[..11] == dp.sfn.name {
                return Ok(());
            }
            self.dir_next(dp, false)?;
        }
    }

    /// Moves to the next visible entry at or after the cursor: files and
    /// directories, or with `label` the volume label. Deleted entries, dot
    /// entries and long-name fragments are skipped.
    pub(crate) fn dir_read(&mut self, dp: &mut DirCursor, label: bool) -> FatResult<()> {
        while dp.sect != 0 {
            self.move_window(dp.sect)?;
            let entry = self.entry(dp);
            let c = entry[DIR_NAME];
            if c == 0 {
                break;
            }
            let a = entry[DIR_ATTR] & Attr::MASK;
            dp.attr = a;
            let is_label = a & !Attr::ARCHIVE.bits() == Attr::VOLUME.bits();
            if c != ENTRY_DELETED && c != b'.' && a != Attr::LONG_NAME && is_label == label {
                return Ok(());
            }
            match self.dir_next(dp, false) {
                Ok(()) => {}
                Err(FatError::NoFile) => break,
                Err(err) => return Err(err),
            }
        }
        dp.sect = 0;
        Err(FatError::NoFile)
    }

    /// Writes a fresh entry named after the cursor's 8.3 name.
    pub(crate) fn dir_register(&mut self, dp: &mut DirCursor) -> FatResult<()> {
        self.dir_alloc(dp, 1)?;
        self.move_window(dp.sect)?;
        let sfn = dp.sfn.name;
        let entry = self.entry_mut(dp);
        entry.fill(0);
        entry[..11].copy_from_slice(&sfn);
        self.win.dirty = true;
        Ok(())
    }

    pub(crate) fn dir_remove(&mut self, dp: &DirCursor) -> FatResult<()> {
        self.move_window(dp.sect)?;
        self.entry_mut(dp)[DIR_NAME] = ENTRY_DELETED;
        self.win.dirty = true;
        Ok(())
    }

    pub(crate) fn get_fileinfo(&self, dp: &DirCursor) -> FileInfo {
        let entry = self.entry(dp);
        let tm = ld_dword(entry, DIR_MOD_TIME);
        FileInfo {
            size: ld_dword(entry, DIR_FILE_SIZE),
            date: (tm >> 16) as u16,
            time: tm as u16,
            attr: Attr::from_bits_truncate(entry[DIR_ATTR]),
            name: name::sfn_to_display(entry),
        }
    }

    /// Walks `path` segment by segment. On success the cursor sits on the
    /// final entry, or carries `NONAME` when the path named the root.
    /// `Err(NoFile)` means only the last segment is missing and the cursor
    /// still describes its parent directory.
    pub(crate) fn follow_path(&mut self, dp: &mut DirCursor, path: &[u8]) -> FatResult<()> {
        let mut pos = path.iter().take_while(|&&c| name::is_separator(c)).count();
        dp.sclust = 0;

        if pos >= path.len() {
            dp.sfn.status = NameStatus::NONAME;
            return self.dir_sdi(dp, 0);
        }

        loop {
            name::create_name(&mut dp.sfn, path, &mut pos)?;
            let ns = dp.status();
            match self.dir_find(dp) {
                Ok(()) => {}
                Err(FatError::NoFile) => {
                    if ns.contains(NameStatus::DOT) && dp.sclust == 0 {
                        // The root has no dot entries; both resolve to it.
                        if !ns.contains(NameStatus::LAST) {
                            continue;
                        }
                        dp.sfn.status = NameStatus::NONAME | NameStatus::DOT;
                        return self.dir_sdi(dp, 0);
                    }
                    if ns.contains(NameStatus::LAST) {
                        return Err(FatError::NoFile);
                    }
                    return Err(FatError::NoPath);
                }
                Err(err) => return Err(err),
            }
            if ns.contains(NameStatus::LAST) {
                return Ok(());
            }
            if dp.attr & Attr::DIRECTORY.bits() == 0 {
                return Err(FatError::NoPath);
            }
            dp.sclust = self.ld_clust(self.entry(dp));
        }
    }
}
