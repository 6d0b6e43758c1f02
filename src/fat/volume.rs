use log::{debug, warn};

use super::{
    ld_dword, ld_word, st_dword, FatError, FatResult, FatType, VolumeInfo, BPB_BYTS_PER_SEC,
    BPB_FAT_SZ16, BPB_FAT_SZ32, BPB_FS_INFO32, BPB_FS_VER32, BPB_NUM_FATS, BPB_ROOT_CLUS32,
    BPB_ROOT_ENT_CNT, BPB_RSVD_SEC_CNT, BPB_SEC_PER_CLUS, BPB_TOT_SEC16, BPB_TOT_SEC32, BS_55AA,
    BS_FIL_SYS_TYPE, BS_FIL_SYS_TYPE32, BS_JMP_BOOT, DIR_ENTRY_SIZE, FSI_FREE_COUNT, FSI_LEAD_SIG,
    FSI_LEAD_SIG_VALUE, FSI_NXT_FREE, FSI_STRUC_SIG, FSI_STRUC_SIG_VALUE, MBR_TABLE, PTE_ST_LBA,
    PTE_SYSTEM, SECTOR_BYTES, SZ_PTE,
};
use crate::{
    disk::{BlockDevice, DiskStatus, IoctlCommand},
    SECTOR_SIZE,
};

const NO_SECTOR: u32 = u32::MAX;

/// Outcome of probing one sector for a FAT boot record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BootSector {
    Fat,
    /// Valid signature but not a FAT boot record, e.g. a partition table.
    NotFat,
    NoSignature,
    DiskError,
}

/// Single-sector cache shared by every FAT and directory access on a volume.
pub(crate) struct Window {
    pub(crate) buf: [u8; SECTOR_SIZE],
    pub(crate) sector: u32,
    pub(crate) dirty: bool,
}

impl Window {
    const fn new() -> Self {
        Self {
            buf: [0; SECTOR_SIZE],
            sector: NO_SECTOR,
            dirty: false,
        }
    }

    fn invalidate(&mut self) {
        self.sector = NO_SECTOR;
        self.dirty = false;
    }
}

pub(crate) struct Volume<D> {
    pub(crate) disk: D,
    pub(crate) registered: bool,
    pub(crate) fs_type: Option<FatType>,
    pub(crate) id: u32,
    pub(crate) n_fats: u8,
    pub(crate) sectors_per_cluster: u32,
    pub(crate) n_rootdir: u32,
    pub(crate) n_fatent: u32,
    pub(crate) fsize: u32,
    pub(crate) volbase: u32,
    pub(crate) fatbase: u32,
    pub(crate) dirbase: u32,
    pub(crate) database: u32,
    pub(crate) free_clst: Option<u32>,
    pub(crate) last_clst: u32,
    pub(crate) fsi_enabled: bool,
    pub(crate) fsi_dirty: bool,
    pub(crate) win: Window,
}

impl<D: BlockDevice> Volume<D> {
    pub(crate) fn new(disk: D) -> Self {
        Self {
            disk,
            registered: false,
            fs_type: None,
            id: 0,
            n_fats: 0,
            sectors_per_cluster: 0,
            n_rootdir: 0,
            n_fatent: 0,
            fsize: 0,
            volbase: 0,
            fatbase: 0,
            dirbase: 0,
            database: 0,
            free_clst: None,
            last_clst: u32::MAX,
            fsi_enabled: false,
            fsi_dirty: false,
            win: Window::new(),
        }
    }

    pub(crate) fn fat_type(&self) -> FatResult<FatType> {
        self.fs_type.ok_or(FatError::InvalidObject)
    }

    pub(crate) fn is_fat32(&self) -> bool {
        self.fs_type == Some(FatType::Fat32)
    }

    /// Writes the window back if dirty, mirroring FAT sectors into the
    /// second FAT copy.
    pub(crate) fn sync_window(&mut self) -> FatResult<()> {
        if !self.win.dirty {
            return Ok(());
        }
        let sector = self.win.sector;
        self.disk.write(sector, &self.win.buf)?;
        self.win.dirty = false;
        if sector.wrapping_sub(self.fatbase) < self.fsize && self.n_fats == 2 {
            self.disk.write(sector + self.fsize, &self.win.buf)?;
        }
        Ok(())
    }

    pub(crate) fn move_window(&mut self, sector: u32) -> FatResult<()> {
        if sector == self.win.sector {
            return Ok(());
        }
        self.sync_window()?;
        if let Err(err) = self.disk.read(sector, &mut self.win.buf) {
            self.win.sector = NO_SECTOR;
            return Err(err.into());
        }
        self.win.sector = sector;
        Ok(())
    }

    /// Flushes the window, the FSInfo sector when its counters changed, and
    /// asks the device to finish pending writes.
    pub(crate) fn sync_fs(&mut self) -> FatResult<()> {
        self.sync_window()?;
        if self.is_fat32() && self.fsi_enabled && self.fsi_dirty {
            let sector = self.volbase + 1;
            let buf = &mut self.win.buf;
            buf.fill(0);
            st_dword(buf, FSI_LEAD_SIG, FSI_LEAD_SIG_VALUE);
            st_dword(buf, FSI_STRUC_SIG, FSI_STRUC_SIG_VALUE);
            st_dword(buf, FSI_FREE_COUNT, self.free_clst.unwrap_or(u32::MAX));
            st_dword(buf, FSI_NXT_FREE, self.last_clst);
            buf[BS_55AA] = 0x55;
            buf[BS_55AA + 1] = 0xAA;
            self.win.sector = sector;
            self.disk.write(sector, &self.win.buf)?;
            self.fsi_dirty = false;
            debug!(
                "fat: fsinfo_written free={:?} next={}",
                self.free_clst, self.last_clst
            );
        }
        self.disk.ioctl(IoctlCommand::Sync)?;
        Ok(())
    }

    /// First sector of a data cluster, or 0 when the cluster is out of range.
    pub(crate) fn clst2sect(&self, clst: u32) -> u32 {
        let clst = clst.wrapping_sub(2);
        if clst >= self.n_fatent - 2 {
            return 0;
        }
        self.database + clst * self.sectors_per_cluster
    }

    fn check_fs(&mut self, sector: u32) -> BootSector {
        self.win.invalidate();
        if self.move_window(sector).is_err() {
            return BootSector::DiskError;
        }
        let buf = &self.win.buf;
        if ld_word(buf, BS_55AA) != 0xAA55 {
            return BootSector::NoSignature;
        }
        let jump = buf[BS_JMP_BOOT];
        if matches!(jump, 0xE9 | 0xEB | 0xE8) {
            if &buf[BS_FIL_SYS_TYPE..BS_FIL_SYS_TYPE + 3] == b"FAT" {
                return BootSector::Fat;
            }
            if &buf[BS_FIL_SYS_TYPE32..BS_FIL_SYS_TYPE32 + 5] == b"FAT32" {
                return BootSector::Fat;
            }
        }
        BootSector::NotFat
    }

    /// Locates the FAT boot record, either at sector 0 or in one of the four
    /// primary partitions, and loads the volume geometry from it.
    pub(crate) fn mount(&mut self, id: u32) -> FatResult<()> {
        self.fs_type = None;

        let mut bsect = 0;
        let mut found = self.check_fs(bsect);
        if found == BootSector::NotFat {
            let mut starts = [0u32; 4];
            for (i, start) in starts.iter_mut().enumerate() {
                let pte = MBR_TABLE + i * SZ_PTE;
                if self.win.buf[pte + PTE_SYSTEM] != 0 {
                    *start = ld_dword(&self.win.buf, pte + PTE_ST_LBA);
                }
            }
            for start in starts {
                bsect = start;
                found = if start != 0 {
                    self.check_fs(start)
                } else {
                    BootSector::NoSignature
                };
                if found == BootSector::Fat {
                    break;
                }
            }
        }
        match found {
            BootSector::Fat => {}
            BootSector::DiskError => return Err(FatError::Disk),
            BootSector::NotFat | BootSector::NoSignature => {
                debug!("fat: mount no_filesystem");
                return Err(FatError::NoFilesystem);
            }
        }

        let buf = &self.win.buf;
        if u32::from(ld_word(buf, BPB_BYTS_PER_SEC)) != SECTOR_BYTES {
            return Err(FatError::NoFilesystem);
        }

        let mut fasize = u32::from(ld_word(buf, BPB_FAT_SZ16));
        if fasize == 0 {
            fasize = ld_dword(buf, BPB_FAT_SZ32);
        }
        let n_fats = buf[BPB_NUM_FATS];
        if n_fats != 1 && n_fats != 2 {
            return Err(FatError::NoFilesystem);
        }
        let fsize = fasize;
        let fasize = fasize * u32::from(n_fats);

        let sectors_per_cluster = u32::from(buf[BPB_SEC_PER_CLUS]);
        if sectors_per_cluster == 0 || !sectors_per_cluster.is_power_of_two() {
            return Err(FatError::NoFilesystem);
        }

        let n_rootdir = u32::from(ld_word(buf, BPB_ROOT_ENT_CNT));
        if n_rootdir % (SECTOR_BYTES / DIR_ENTRY_SIZE) != 0 {
            return Err(FatError::NoFilesystem);
        }

        let mut tsect = u32::from(ld_word(buf, BPB_TOT_SEC16));
        if tsect == 0 {
            tsect = ld_dword(buf, BPB_TOT_SEC32);
        }

        let nrsv = u32::from(ld_word(buf, BPB_RSVD_SEC_CNT));
        if nrsv == 0 {
            return Err(FatError::NoFilesystem);
        }

        let sysect = nrsv + fasize + n_rootdir / (SECTOR_BYTES / DIR_ENTRY_SIZE);
        if tsect < sysect {
            return Err(FatError::NoFilesystem);
        }
        let nclst = (tsect - sysect) / sectors_per_cluster;
        if nclst == 0 {
            return Err(FatError::NoFilesystem);
        }
        let fat_type = FatType::from_cluster_count(nclst).ok_or(FatError::NoFilesystem)?;

        let n_fatent = nclst + 2;
        let volbase = bsect;
        let fatbase = bsect + nrsv;
        let database = bsect + sysect;

        let (dirbase, szbfat) = match fat_type {
            FatType::Fat32 => {
                if ld_word(buf, BPB_FS_VER32) != 0 || n_rootdir != 0 {
                    return Err(FatError::NoFilesystem);
                }
                (ld_dword(buf, BPB_ROOT_CLUS32), n_fatent * 4)
            }
            FatType::Fat16 | FatType::Fat12 => {
                if n_rootdir == 0 {
                    return Err(FatError::NoFilesystem);
                }
                let szbfat = if fat_type == FatType::Fat16 {
                    n_fatent * 2
                } else {
                    n_fatent * 3 / 2 + (n_fatent & 1)
                };
                (fatbase + fasize, szbfat)
            }
        };
        if fsize < szbfat.div_ceil(SECTOR_BYTES) {
            return Err(FatError::NoFilesystem);
        }
        let fsinfo_at = if fat_type == FatType::Fat32 {
            ld_word(buf, BPB_FS_INFO32)
        } else {
            0
        };

        self.n_fats = n_fats;
        self.sectors_per_cluster = sectors_per_cluster;
        self.n_rootdir = n_rootdir;
        self.n_fatent = n_fatent;
        self.fsize = fsize;
        self.volbase = volbase;
        self.fatbase = fatbase;
        self.dirbase = dirbase;
        self.database = database;
        self.free_clst = None;
        self.last_clst = u32::MAX;
        self.fsi_enabled = false;
        self.fsi_dirty = false;

        if fsinfo_at == 1 {
            self.load_fsinfo(bsect + 1);
        }

        self.fs_type = Some(fat_type);
        self.id = id;
        debug!(
            "fat: mounted type={:?} base={} clusters={} sectors_per_cluster={} gen={}",
            fat_type, volbase, nclst, sectors_per_cluster, id
        );
        Ok(())
    }

    fn load_fsinfo(&mut self, sector: u32) {
        if let Err(err) = self.move_window(sector) {
            warn!("fat: fsinfo_unreadable sector={} err={:?}", sector, err);
            return;
        }
        self.fsi_enabled = true;
        let buf = &self.win.buf;
        if ld_word(buf, BS_55AA) != 0xAA55
            || ld_dword(buf, FSI_LEAD_SIG) != FSI_LEAD_SIG_VALUE
            || ld_dword(buf, FSI_STRUC_SIG) != FSI_STRUC_SIG_VALUE
        {
            return;
        }
        let free = ld_dword(buf, FSI_FREE_COUNT);
        if free <= self.n_fatent - 2 {
            self.free_clst = Some(free);
        }
        self.last_clst = ld_dword(buf, FSI_NXT_FREE);
    }

    /// Whether the volume is mounted and its device still reports an
    /// initialized medium.
    pub(crate) fn is_live(&self) -> bool {
        self.fs_type.is_some() && !self.disk.status().contains(DiskStatus::NOT_INITIALIZED)
    }

    pub(crate) fn info(&self) -> FatResult<VolumeInfo> {
        Ok(VolumeInfo {
            fat_type: self.fat_type()?,
            generation: self.id,
            fat_count: self.n_fats,
            sectors_per_cluster: self.sectors_per_cluster,
            fat_entries: self.n_fatent,
            fat_size: self.fsize,
            root_entries: self.n_rootdir,
            volume_base: self.volbase,
            fat_base: self.fatbase,
            root_base: self.dirbase,
            data_base: self.database,
        })
    }
}
