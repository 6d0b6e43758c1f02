use super::{
    context::ObjectId, dir::DirCursor, ld_dword, name::NameStatus, Attr, FatError, FatFs,
    FatResult, FileInfo, TimeSource, BS_VOL_ID, BS_VOL_ID32,
};
use crate::disk::BlockDevice;

/// Open directory handle for forward-only iteration.
pub struct Dir {
    pub(crate) obj: ObjectId,
    pub(crate) cursor: DirCursor,
}

impl Dir {
    pub fn is_open(&self) -> bool {
        self.obj.generation != 0
    }
}

/// Volume label and serial number.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VolumeLabel {
    pub label: heapless::String<11>,
    pub serial: u32,
}

impl<D: BlockDevice, T: TimeSource, const VOLUMES: usize> FatFs<D, T, VOLUMES> {
    pub fn opendir(&mut self, path: &str) -> FatResult<Dir> {
        let (drive, path) = self.resolve(path, false)?;
        let vol = &mut self.volumes[drive];
        let mut dj = DirCursor::new();
        match vol.follow_path(&mut dj, path) {
            Ok(()) => {}
            Err(FatError::NoFile) => return Err(FatError::NoPath),
            Err(err) => return Err(err),
        }
        if !dj.status().contains(NameStatus::NONAME) {
            if dj.attr & Attr::DIRECTORY.bits() == 0 {
                return Err(FatError::NoPath);
            }
            dj.sclust = vol.ld_clust(vol.entry(&dj));
        }
        match vol.dir_sdi(&mut dj, 0) {
            Ok(()) => {}
            Err(FatError::NoFile) => return Err(FatError::NoPath),
            Err(err) => return Err(err),
        }
        Ok(Dir {
            obj: ObjectId {
                drive: drive as u8,
                generation: vol.id,
                attr: Attr::DIRECTORY.bits(),
                sclust: dj.sclust,
                objsize: 0,
            },
            cursor: dj,
        })
    }

    /// Returns the next entry, or `None` once the directory is exhausted.
    /// Deleted entries, `.`/`..` and the volume label are skipped.
    pub fn readdir(&mut self, dir: &mut Dir) -> FatResult<Option<FileInfo>> {
        let vol = self.validate(&dir.obj)?;
        let dp = &mut dir.cursor;
        match vol.dir_read(dp, false) {
            Ok(()) => {}
            Err(FatError::NoFile) => return Ok(None),
            Err(err) => return Err(err),
        }
        let info = vol.get_fileinfo(dp);
        match vol.dir_next(dp, false) {
            Ok(()) | Err(FatError::NoFile) => Ok(Some(info)),
            Err(err) => Err(err),
        }
    }

    pub fn rewinddir(&mut self, dir: &mut Dir) -> FatResult<()> {
        let vol = self.validate(&dir.obj)?;
        vol.dir_sdi(&mut dir.cursor, 0)
    }

    pub fn closedir(&mut self, dir: &mut Dir) -> FatResult<()> {
        self.validate(&dir.obj)?;
        dir.obj = ObjectId::closed();
        Ok(())
    }

    pub fn stat(&mut self, path: &str) -> FatResult<FileInfo> {
        let (drive, path) = self.resolve(path, false)?;
        let vol = &mut self.volumes[drive];
        let mut dj = DirCursor::new();
        vol.follow_path(&mut dj, path)?;
        if dj.status().contains(NameStatus::NONAME) {
            return Err(FatError::InvalidName);
        }
        Ok(vol.get_fileinfo(&dj))
    }

    /// Number of free clusters on the drive. The count is cached after the
    /// first full scan and kept current by allocation and release.
    pub fn getfree(&mut self, drive: u8) -> FatResult<u32> {
        let vol = self.find_volume(usize::from(drive), false)?;
        if let Some(free) = vol.free_clst {
            if free <= vol.n_fatent - 2 {
                return Ok(free);
            }
        }
        let free = vol.count_free()?;
        vol.free_clst = Some(free);
        vol.fsi_dirty = true;
        Ok(free)
    }

    pub fn get_label(&mut self, drive: u8) -> FatResult<VolumeLabel> {
        let vol = self.find_volume(usize::from(drive), false)?;
        let mut dj = DirCursor::new();
        vol.dir_sdi(&mut dj, 0)?;
        let mut label = heapless::String::new();
        match vol.dir_read(&mut dj, true) {
            Ok(()) => {
                let raw = &vol.entry(&dj)[..11];
                let len = raw.iter().rposition(|&c| c != b' ').map_or(0, |i| i + 1);
                for &c in &raw[..len] {
                    let _ = label.push(if c.is_ascii() { char::from(c) } else { '?' });
                }
            }
            Err(FatError::NoFile) => {}
            Err(err) => return Err(err),
        }
        let serial_at = if vol.is_fat32() { BS_VOL_ID32 } else { BS_VOL_ID };
        vol.move_window(vol.volbase)?;
        let serial = ld_dword(&vol.win.buf, serial_at);
        Ok(VolumeLabel { label, serial })
    }
}
