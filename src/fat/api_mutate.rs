use log::{debug, warn};

use super::{
    dir::{st_clust, DirCursor},
    name::{self, NameStatus},
    st_dword, Attr, FatError, FatFs, FatResult, TimeSource, DIR_ATTR, DIR_ENTRY_SIZE, DIR_MOD_TIME,
    DIR_NAME,
};
use crate::disk::BlockDevice;

const ENTRY_LEN: usize = DIR_ENTRY_SIZE as usize;

impl<D: BlockDevice, T: TimeSource, const VOLUMES: usize> FatFs<D, T, VOLUMES> {
    /// Creates a directory holding `.` and `..` entries. Any cluster taken
    /// for it is released again if registering the entry fails.
    pub fn mkdir(&mut self, path: &str) -> FatResult<()> {
        let now = self.timestamp();
        let (drive, path) = self.resolve(path, true)?;
        let vol = &mut self.volumes[drive];
        let mut dj = DirCursor::new();
        match vol.follow_path(&mut dj, path) {
            Ok(()) => return Err(FatError::Exist),
            Err(FatError::NoFile) if dj.status().contains(NameStatus::DOT) => {
                return Err(FatError::InvalidName)
            }
            Err(FatError::NoFile) => {}
            Err(err) => return Err(err),
        }

        let dcl = vol.create_chain(0)?.ok_or(FatError::Denied)?;
        let fat32 = vol.is_fat32();
        let built = vol.dir_clear(dcl).and_then(|()| {
            let parent = dj.sclust;
            let win = &mut vol.win.buf;
            win[..11].fill(b' ');
            win[DIR_NAME] = b'.';
            win[DIR_ATTR] = Attr::DIRECTORY.bits();
            st_dword(win, DIR_MOD_TIME, now);
            st_clust(win, dcl, fat32);
            win.copy_within(0..ENTRY_LEN, ENTRY_LEN);
            win[ENTRY_LEN + 1] = b'.';
            st_clust(&mut win[ENTRY_LEN..2 * ENTRY_LEN], parent, fat32);
            vol.win.dirty = true;
            vol.dir_register(&mut dj)
        });
        if let Err(err) = built {
            warn!("fat: mkdir_failed err={:?}, releasing clst={}", err, dcl);
            if let Err(rollback) = vol.remove_chain(dcl, None).and_then(|()| vol.sync_fs()) {
                warn!("fat: mkdir_rollback_failed clst={} err={:?}", dcl, rollback);
            }
            return Err(err);
        }

        let entry = vol.entry_mut(&dj);
        st_dword(entry, DIR_MOD_TIME, now);
        st_clust(entry, dcl, fat32);
        entry[DIR_ATTR] = Attr::DIRECTORY.bits();
        vol.win.dirty = true;
        vol.sync_fs()?;
        debug!("fat: mkdir clst={} parent={}", dcl, dj.sclust);
        Ok(())
    }

    /// Removes a file or an empty directory. Read-only objects are refused.
    pub fn unlink(&mut self, path: &str) -> FatResult<()> {
        let (drive, path) = self.resolve(path, true)?;
        let vol = &mut self.volumes[drive];
        let mut dj = DirCursor::new();
        vol.follow_path(&mut dj, path)?;
        if dj.status().intersects(NameStatus::DOT | NameStatus::NONAME) {
            return Err(FatError::InvalidName);
        }
        if dj.attr & Attr::READ_ONLY.bits() != 0 {
            return Err(FatError::Denied);
        }

        let dclst = vol.ld_clust(vol.entry(&dj));
        if dj.attr & Attr::DIRECTORY.bits() != 0 {
            let mut sdj = DirCursor::new();
            sdj.sclust = dclst;
            vol.dir_sdi(&mut sdj, 0)?;
            match vol.dir_read(&mut sdj, false) {
                Ok(()) => return Err(FatError::Denied),
                Err(FatError::NoFile) => {}
                Err(err) => return Err(err),
            }
        }

        vol.dir_remove(&dj)?;
        if dclst != 0 {
            vol.remove_chain(dclst, None)?;
        }
        vol.sync_fs()?;
        debug!("fat: unlink clst={}", dclst);
        Ok(())
    }

    /// Renames or moves an object within its drive. The entry keeps its
    /// start cluster, size and timestamps; a moved directory gets its `..`
    /// entry pointed at the new parent.
    pub fn rename(&mut self, old: &str, new: &str) -> FatResult<()> {
        let (new_drive, new_path) = name::split_drive(new, VOLUMES)?;
        let (drive, old_path) = self.resolve(old, true)?;
        let new_has_prefix = new_path.len() != new.len();
        if new_has_prefix && new_drive != drive {
            return Err(FatError::InvalidDrive);
        }
        let vol = &mut self.volumes[drive];

        let mut djo = DirCursor::new();
        vol.follow_path(&mut djo, old_path)?;
        if djo.status().intersects(NameStatus::DOT | NameStatus::NONAME) {
            return Err(FatError::InvalidName);
        }
        let mut saved = [0u8; ENTRY_LEN];
        saved.copy_from_slice(vol.entry(&djo));

        let mut djn = djo;
        match vol.follow_path(&mut djn, new_path) {
            Ok(()) if djn.sclust == djo.sclust && djn.offset == djo.offset => {}
            Ok(()) => return Err(FatError::Exist),
            Err(FatError::NoFile) => {}
            Err(err) => return Err(err),
        }
        if djn.status().intersects(NameStatus::DOT | NameStatus::NONAME) {
            return Err(FatError::InvalidName);
        }

        vol.dir_register(&mut djn)?;
        let entry = vol.entry_mut(&djn);
        entry[13..].copy_from_slice(&saved[13..]);
        entry[DIR_ATTR] = saved[DIR_ATTR];
        if entry[DIR_ATTR] & Attr::DIRECTORY.bits() == 0 {
            entry[DIR_ATTR] |= Attr::ARCHIVE.bits();
        }
        vol.win.dirty = true;

        let is_dir = saved[DIR_ATTR] & Attr::DIRECTORY.bits() != 0;
        if is_dir && djo.sclust != djn.sclust {
            let sect = vol.clst2sect(vol.ld_clust(&saved));
            if sect == 0 {
                return Err(FatError::Internal);
            }
            vol.move_window(sect)?;
            let fat32 = vol.is_fat32();
            let dotdot = &mut vol.win.buf[ENTRY_LEN..2 * ENTRY_LEN];
            if dotdot[1] == b'.' {
                st_clust(dotdot, djn.sclust, fat32);
                vol.win.dirty = true;
            }
        }

        vol.dir_remove(&djo)?;
        vol.sync_fs()?;
        debug!("fat: rename from_dir={} to_dir={}", djo.sclust, djn.sclust);
        Ok(())
    }

    /// Sets the attribute bits selected by `mask`; only read-only, hidden,
    /// system and archive can change.
    pub fn chmod(&mut self, path: &str, attr: Attr, mask: Attr) -> FatResult<()> {
        let (drive, path) = self.resolve(path, true)?;
        let vol = &mut self.volumes[drive];
        let mut dj = DirCursor::new();
        vol.follow_path(&mut dj, path)?;
        if dj.status().intersects(NameStatus::DOT | NameStatus::NONAME) {
            return Err(FatError::InvalidName);
        }
        let mask = (mask & Attr::CHANGEABLE).bits();
        let entry = vol.entry_mut(&dj);
        entry[DIR_ATTR] = (attr.bits() & mask) | (entry[DIR_ATTR] & !mask);
        vol.win.dirty = true;
        vol.sync_fs()
    }

    /// Overwrites the modification timestamp of an entry.
    pub fn utime(&mut self, path: &str, date: u16, time: u16) -> FatResult<()> {
        let (drive, path) = self.resolve(path, true)?;
        let vol = &mut self.volumes[drive];
        let mut dj = DirCursor::new();
        vol.follow_path(&mut dj, path)?;
        if dj.status().intersects(NameStatus::DOT | NameStatus::NONAME) {
            return Err(FatError::InvalidName);
        }
        let entry = vol.entry_mut(&dj);
        st_dword(entry, DIR_MOD_TIME, (u32::from(date) << 16) | u32::from(time));
        vol.win.dirty = true;
        vol.sync_fs()
    }
}
