use log::{debug, warn};

use super::{
    context::ObjectId,
    dir::{st_clust, DirCursor},
    ld_dword,
    name::NameStatus,
    st_dword, st_word,
    volume::Volume,
    Attr, FatError, FatFs, FatResult, OpenMode, TimeSource, DIR_ATTR, DIR_CRT_TIME,
    DIR_FILE_SIZE, DIR_LST_ACC_DATE, DIR_MOD_TIME, SECTOR_BYTES,
};
use crate::{disk::BlockDevice, SECTOR_SIZE};

/// Open file handle with its own one-sector data buffer.
///
/// A hard error during a transfer is remembered in the handle; later reads,
/// writes, seeks and truncations fail with the same error. Syncing and
/// closing still record whatever already reached the medium.
pub struct File {
    pub(crate) obj: ObjectId,
    mode: OpenMode,
    modified: bool,
    dirty: bool,
    err: Option<FatError>,
    fptr: u32,
    clust: u32,
    sect: u32,
    dir_sect: u32,
    dir_ofs: usize,
    buf: [u8; SECTOR_SIZE],
}

impl File {
    pub fn tell(&self) -> u32 {
        self.fptr
    }

    pub fn size(&self) -> u32 {
        self.obj.objsize
    }

    pub fn is_eof(&self) -> bool {
        self.fptr == self.obj.objsize
    }

    pub fn error(&self) -> Option<FatError> {
        self.err
    }

    pub fn is_open(&self) -> bool {
        self.obj.generation != 0
    }

    fn abort(&mut self, err: FatError) -> FatError {
        self.err = Some(err);
        err
    }

    fn check(&self) -> FatResult<()> {
        match self.err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Writes the data buffer back to its sector if it holds unsaved bytes.
    fn flush_buffer<D: BlockDevice>(&mut self, vol: &mut Volume<D>) -> FatResult<()> {
        if self.dirty {
            if vol.disk.write(self.sect, &self.buf).is_err() {
                return Err(self.abort(FatError::Disk));
            }
            self.dirty = false;
        }
        Ok(())
    }
}

impl<D: BlockDevice, T: TimeSource, const VOLUMES: usize> FatFs<D, T, VOLUMES> {
    /// Opens or creates a file.
    ///
    /// A missing file is created with `CREATE_NEW`, `CREATE_ALWAYS` or
    /// `OPEN_ALWAYS`; `CREATE_ALWAYS` truncates an existing one. Directories
    /// cannot be opened and read-only files reject `WRITE` and
    /// `CREATE_ALWAYS`.
    pub fn open(&mut self, path: &str, mode: OpenMode) -> FatResult<File> {
        let create = OpenMode::CREATE_NEW | OpenMode::CREATE_ALWAYS | OpenMode::OPEN_ALWAYS;
        let mode = mode & (OpenMode::READ | OpenMode::WRITE | create | OpenMode::SEEK_END);
        let writes = mode.intersects(OpenMode::WRITE | create);
        let now = self.timestamp();
        let (drive, path) = self.resolve(path, writes)?;
        let vol = &mut self.volumes[drive];

        let mut dj = DirCursor::new();
        let found = vol.follow_path(&mut dj, path);
        let found = match found {
            Ok(()) if dj.status().contains(NameStatus::NONAME) => Err(FatError::InvalidName),
            other => other,
        };

        let mut mode = mode;
        if mode.intersects(create) {
            match found {
                Err(FatError::NoFile) => {
                    vol.dir_register(&mut dj)?;
                    mode |= OpenMode::CREATE_ALWAYS;
                }
                Err(err) => return Err(err),
                Ok(()) => {
                    if dj.attr & (Attr::READ_ONLY | Attr::DIRECTORY).bits() != 0 {
                        return Err(FatError::Denied);
                    }
                    if mode.contains(OpenMode::CREATE_NEW) {
                        return Err(FatError::Exist);
                    }
                }
            }
            if mode.contains(OpenMode::CREATE_ALWAYS) {
                Self::reset_entry(vol, &dj, now)?;
            }
        } else {
            found?;
            if dj.attr & Attr::DIRECTORY.bits() != 0 {
                return Err(FatError::NoFile);
            }
            if mode.contains(OpenMode::WRITE) && dj.attr & Attr::READ_ONLY.bits() != 0 {
                return Err(FatError::Denied);
            }
        }

        let modified = mode.contains(OpenMode::CREATE_ALWAYS);
        let entry = vol.entry(&dj);
        let sclust = vol.ld_clust(entry);
        let objsize = ld_dword(entry, DIR_FILE_SIZE);
        let mut file = File {
            obj: ObjectId {
                drive: drive as u8,
                generation: vol.id,
                attr: dj.attr,
                sclust,
                objsize,
            },
            mode: mode & (OpenMode::READ | OpenMode::WRITE),
            modified,
            dirty: false,
            err: None,
            fptr: 0,
            clust: 0,
            sect: 0,
            dir_sect: vol.win.sector,
            dir_ofs: dj.win_ofs(),
            buf: [0; SECTOR_SIZE],
        };

        if mode.contains(OpenMode::SEEK_END) && objsize > 0 {
            Self::seek_to_end(vol, &mut file)?;
        }
        debug!(
            "fat: open sclust={} size={} mode={:?}",
            sclust, objsize, file.mode
        );
        Ok(file)
    }

    /// Clears an existing entry to an empty archive file stamped `now`,
    /// freeing its old cluster chain.
    fn reset_entry(vol: &mut Volume<D>, dj: &DirCursor, now: u32) -> FatResult<()> {
        let old = vol.ld_clust(vol.entry(dj));
        let fat32 = vol.is_fat32();
        let entry = vol.entry_mut(dj);
        st_dword(entry, DIR_CRT_TIME, now);
        entry[DIR_ATTR] = Attr::ARCHIVE.bits();
        st_clust(entry, 0, fat32);
        st_dword(entry, DIR_FILE_SIZE, 0);
        st_dword(entry, DIR_MOD_TIME, now);
        vol.win.dirty = true;
        if old != 0 {
            let dw = vol.win.sector;
            vol.remove_chain(old, None)?;
            vol.move_window(dw)?;
            vol.last_clst = old - 1;
        }
        Ok(())
    }

    fn seek_to_end(vol: &mut Volume<D>, file: &mut File) -> FatResult<()> {
        let target = file.obj.objsize;
        let cluster_bytes = vol.sectors_per_cluster * SECTOR_BYTES;
        let mut clst = file.obj.sclust;
        let mut ofs = target;
        while ofs > cluster_bytes {
            clst = vol.get_fat(clst)?;
            if clst >= vol.n_fatent {
                return Err(FatError::Internal);
            }
            ofs -= cluster_bytes;
        }
        file.clust = clst;
        file.fptr = target;
        if ofs % SECTOR_BYTES != 0 {
            let sect = vol.clst2sect(clst);
            if sect == 0 {
                return Err(FatError::Internal);
            }
            file.sect = sect + (ofs / SECTOR_BYTES);
            vol.disk.read(file.sect, &mut file.buf)?;
        }
        Ok(())
    }

    /// Reads up to `buf.len()` bytes at the file pointer and returns how many
    /// were read; fewer than requested means the end of the file.
    pub fn read(&mut self, file: &mut File, buf: &mut [u8]) -> FatResult<usize> {
        let vol = self.validate(&file.obj)?;
        file.check()?;
        if !file.mode.contains(OpenMode::READ) {
            return Err(FatError::Denied);
        }
        let remain = file.obj.objsize - file.fptr;
        let total = buf.len().min(remain as usize);
        let mut done = 0;

        while done < total {
            let btr = total - done;
            if file.fptr % SECTOR_BYTES == 0 {
                let csect = (file.fptr / SECTOR_BYTES) & (vol.sectors_per_cluster - 1);
                if csect == 0 {
                    let clst = if file.fptr == 0 {
                        file.obj.sclust
                    } else {
                        vol.get_fat(file.clust).map_err(|e| file.abort(e))?
                    };
                    if clst < 2 {
                        return Err(file.abort(FatError::Internal));
                    }
                    file.clust = clst;
                }
                let sect = vol.clst2sect(file.clust);
                if sect == 0 {
                    return Err(file.abort(FatError::Internal));
                }
                let sect = sect + csect;
                let mut cc = (btr / SECTOR_SIZE) as u32;
                if cc > 0 {
                    if csect + cc > vol.sectors_per_cluster {
                        cc = vol.sectors_per_cluster - csect;
                    }
                    let span = cc as usize * SECTOR_SIZE;
                    let out = &mut buf[done..done + span];
                    if vol.disk.read(sect, out).is_err() {
                        return Err(file.abort(FatError::Disk));
                    }
                    // The buffered sector may be newer than the medium.
                    let held = file.sect.wrapping_sub(sect);
                    if file.dirty && held < cc {
                        let at = held as usize * SECTOR_SIZE;
                        out[at..at + SECTOR_SIZE].copy_from_slice(&file.buf);
                    }
                    file.fptr += span as u32;
                    done += span;
                    continue;
                }
                if file.sect != sect {
                    file.flush_buffer(vol)?;
                    if vol.disk.read(sect, &mut file.buf).is_err() {
                        return Err(file.abort(FatError::Disk));
                    }
                }
                file.sect = sect;
            }
            let at = (file.fptr % SECTOR_BYTES) as usize;
            let n = (SECTOR_SIZE - at).min(btr);
            buf[done..done + n].copy_from_slice(&file.buf[at..at + n]);
            file.fptr += n as u32;
            done += n;
        }
        Ok(done)
    }

    /// Writes `data` at the file pointer, allocating clusters as needed.
    /// Returns the number of bytes written; a short count means the volume
    /// ran out of free clusters.
    pub fn write(&mut self, file: &mut File, data: &[u8]) -> FatResult<usize> {
        let vol = self.validate(&file.obj)?;
        file.check()?;
        if !file.mode.contains(OpenMode::WRITE) {
            return Err(FatError::Denied);
        }
        let room = (u32::MAX - file.fptr) as usize;
        let total = data.len().min(room);
        let mut done = 0;

        while done < total {
            let btw = total - done;
            if file.fptr % SECTOR_BYTES == 0 {
                let csect = (file.fptr / SECTOR_BYTES) & (vol.sectors_per_cluster - 1);
                if csect == 0 {
                    let next = if file.fptr == 0 && file.obj.sclust != 0 {
                        Ok(Some(file.obj.sclust))
                    } else if file.fptr == 0 {
                        vol.create_chain(0)
                    } else {
                        vol.create_chain(file.clust)
                    };
                    let Some(clst) = next.map_err(|e| file.abort(e))? else {
                        warn!("fat: write_short volume_full fptr={}", file.fptr);
                        break;
                    };
                    file.clust = clst;
                    if file.obj.sclust == 0 {
                        file.obj.sclust = clst;
                    }
                    file.modified = true;
                }
                file.flush_buffer(vol)?;
                let sect = vol.clst2sect(file.clust);
                if sect == 0 {
                    return Err(file.abort(FatError::Internal));
                }
                let sect = sect + csect;
                let mut cc = (btw / SECTOR_SIZE) as u32;
                if cc > 0 {
                    if csect + cc > vol.sectors_per_cluster {
                        cc = vol.sectors_per_cluster - csect;
                    }
                    let span = cc as usize * SECTOR_SIZE;
                    let src = &data[done..done + span];
                    if vol.disk.write(sect, src).is_err() {
                        return Err(file.abort(FatError::Disk));
                    }
                    let held = file.sect.wrapping_sub(sect);
                    if held < cc {
                        let at = held as usize * SECTOR_SIZE;
                        file.buf.copy_from_slice(&src[at..at + SECTOR_SIZE]);
                        file.dirty = false;
                    }
                    file.fptr += span as u32;
                    file.obj.objsize = file.obj.objsize.max(file.fptr);
                    done += span;
                    continue;
                }
                if file.sect != sect
                    && file.fptr < file.obj.objsize
                    && vol.disk.read(sect, &mut file.buf).is_err()
                {
                    return Err(file.abort(FatError::Disk));
                }
                file.sect = sect;
            }
            let at = (file.fptr % SECTOR_BYTES) as usize;
            let n = (SECTOR_SIZE - at).min(btw);
            file.buf[at..at + n].copy_from_slice(&data[done..done + n]);
            file.dirty = true;
            file.fptr += n as u32;
            file.obj.objsize = file.obj.objsize.max(file.fptr);
            done += n;
        }
        file.modified = true;
        Ok(done)
    }

    /// Moves the file pointer. Without write access the target is clipped to
    /// the file size; with write access seeking past the end grows the file.
    pub fn seek(&mut self, file: &mut File, ofs: u32) -> FatResult<()> {
        let vol = self.validate(&file.obj)?;
        file.check()?;
        let mut ofs = ofs;
        if ofs > file.obj.objsize && !file.mode.contains(OpenMode::WRITE) {
            ofs = file.obj.objsize;
        }
        let ifptr = file.fptr;
        file.fptr = 0;
        let mut nsect = 0;

        if ofs > 0 {
            let cluster_bytes = vol.sectors_per_cluster * SECTOR_BYTES;
            let mut clst;
            if ifptr > 0 && (ofs - 1) / cluster_bytes >= (ifptr - 1) / cluster_bytes {
                file.fptr = (ifptr - 1) & !(cluster_bytes - 1);
                ofs -= file.fptr;
                clst = file.clust;
            } else {
                clst = file.obj.sclust;
                if clst == 0 {
                    clst = vol
                        .create_chain(0)
                        .map_err(|e| file.abort(e))?
                        .unwrap_or(0);
                    file.obj.sclust = clst;
                }
                file.clust = clst;
            }
            if clst != 0 {
                while ofs > cluster_bytes {
                    ofs -= cluster_bytes;
                    file.fptr += cluster_bytes;
                    let next = if file.mode.contains(OpenMode::WRITE) {
                        vol.create_chain(clst).map_err(|e| file.abort(e))?
                    } else {
                        Some(vol.get_fat(clst).map_err(|e| file.abort(e))?)
                    };
                    match next {
                        Some(next) if next >= 2 && next < vol.n_fatent => clst = next,
                        Some(_) => return Err(file.abort(FatError::Internal)),
                        None => {
                            // Volume full: stop at the end of the chain.
                            ofs = 0;
                            break;
                        }
                    }
                    file.clust = clst;
                }
                file.fptr += ofs;
                if ofs % SECTOR_BYTES != 0 {
                    let sect = vol.clst2sect(clst);
                    if sect == 0 {
                        return Err(file.abort(FatError::Internal));
                    }
                    nsect = sect + ofs / SECTOR_BYTES;
                }
            }
        }
        if file.fptr > file.obj.objsize {
            file.obj.objsize = file.fptr;
            file.modified = true;
        }
        if file.fptr % SECTOR_BYTES != 0 && nsect != file.sect {
            file.flush_buffer(vol)?;
            if vol.disk.read(nsect, &mut file.buf).is_err() {
                return Err(file.abort(FatError::Disk));
            }
            file.sect = nsect;
        }
        Ok(())
    }

    /// Cuts the file at the current file pointer and frees the clusters
    /// beyond it.
    pub fn truncate(&mut self, file: &mut File) -> FatResult<()> {
        let vol = self.validate(&file.obj)?;
        file.check()?;
        if !file.mode.contains(OpenMode::WRITE) {
            return Err(FatError::Denied);
        }
        if file.fptr >= file.obj.objsize {
            return Ok(());
        }
        if file.fptr == 0 {
            vol.remove_chain(file.obj.sclust, None)
                .map_err(|e| file.abort(e))?;
            file.obj.sclust = 0;
        } else {
            let next = vol.get_fat(file.clust).map_err(|e| file.abort(e))?;
            if next < vol.n_fatent {
                vol.remove_chain(next, Some(file.clust))
                    .map_err(|e| file.abort(e))?;
            }
        }
        file.obj.objsize = file.fptr;
        file.modified = true;
        if file.dirty {
            file.flush_buffer(vol)?;
        }
        Ok(())
    }

    /// Flushes buffered data and, if the file changed, its directory entry:
    /// start cluster, size, archive bit and modification time.
    pub fn sync(&mut self, file: &mut File) -> FatResult<()> {
        let now = self.timestamp();
        let vol = self.validate(&file.obj)?;
        if !file.modified {
            return Ok(());
        }
        file.flush_buffer(vol)?;
        vol.move_window(file.dir_sect)?;
        let fat32 = vol.is_fat32();
        let entry = &mut vol.win.buf[file.dir_ofs..file.dir_ofs + 32];
        entry[DIR_ATTR] |= Attr::ARCHIVE.bits();
        st_clust(entry, file.obj.sclust, fat32);
        st_dword(entry, DIR_FILE_SIZE, file.obj.objsize);
        st_dword(entry, DIR_MOD_TIME, now);
        st_word(entry, DIR_LST_ACC_DATE, 0);
        vol.win.dirty = true;
        vol.sync_fs()?;
        file.modified = false;
        Ok(())
    }

    /// Syncs the file and invalidates the handle.
    pub fn close(&mut self, file: &mut File) -> FatResult<()> {
        self.sync(file)?;
        file.obj = ObjectId::closed();
        Ok(())
    }
}
