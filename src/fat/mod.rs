//! FAT12/16/32 filesystem engine with 8.3 names.
//!
//! All state lives in a [`FatFs`] context that owns one block device per
//! logical drive. Every operation takes `&mut FatFs`, so callers sharing a
//! context across tasks wrap it in a single lock.

mod api_dir;
mod api_file;
mod api_mutate;
mod context;
mod dir;
mod error;
mod name;
mod table;
mod volume;

use bitflags::bitflags;

pub use api_dir::{Dir, VolumeLabel};
pub use api_file::File;
pub use context::FatFs;
pub use error::FatError;

pub(crate) type FatResult<T> = Result<T, FatError>;

pub(crate) const SECTOR_BYTES: u32 = crate::SECTOR_SIZE as u32;
pub(crate) const DIR_ENTRY_SIZE: u32 = 32;
pub(crate) const MAX_DIR_BYTES: u32 = 0x0020_0000;
/// First name byte of a deleted entry.
pub(crate) const ENTRY_DELETED: u8 = 0xE5;
/// Stand-in stored for a real first name byte of 0xE5.
pub(crate) const ENTRY_E5_ESCAPE: u8 = 0x05;

pub(crate) const MAX_FAT12: u32 = 0xFF5;
pub(crate) const MAX_FAT16: u32 = 0xFFF5;
pub(crate) const MAX_FAT32: u32 = 0x0FFF_FFF5;

pub(crate) const BS_JMP_BOOT: usize = 0;
pub(crate) const BPB_BYTS_PER_SEC: usize = 11;
pub(crate) const BPB_SEC_PER_CLUS: usize = 13;
pub(crate) const BPB_RSVD_SEC_CNT: usize = 14;
pub(crate) const BPB_NUM_FATS: usize = 16;
pub(crate) const BPB_ROOT_ENT_CNT: usize = 17;
pub(crate) const BPB_TOT_SEC16: usize = 19;
pub(crate) const BPB_FAT_SZ16: usize = 22;
pub(crate) const BPB_TOT_SEC32: usize = 32;
pub(crate) const BS_VOL_ID: usize = 39;
pub(crate) const BS_FIL_SYS_TYPE: usize = 54;
pub(crate) const BPB_FAT_SZ32: usize = 36;
pub(crate) const BPB_FS_VER32: usize = 42;
pub(crate) const BPB_ROOT_CLUS32: usize = 44;
pub(crate) const BPB_FS_INFO32: usize = 48;
pub(crate) const BS_VOL_ID32: usize = 67;
pub(crate) const BS_FIL_SYS_TYPE32: usize = 82;
pub(crate) const BS_55AA: usize = 510;
pub(crate) const MBR_TABLE: usize = 446;
pub(crate) const SZ_PTE: usize = 16;
pub(crate) const PTE_SYSTEM: usize = 4;
pub(crate) const PTE_ST_LBA: usize = 8;

pub(crate) const FSI_LEAD_SIG: usize = 0;
pub(crate) const FSI_STRUC_SIG: usize = 484;
pub(crate) const FSI_FREE_COUNT: usize = 488;
pub(crate) const FSI_NXT_FREE: usize = 492;
pub(crate) const FSI_LEAD_SIG_VALUE: u32 = 0x4161_5252;
pub(crate) const FSI_STRUC_SIG_VALUE: u32 = 0x6141_7272;

pub(crate) const DIR_NAME: usize = 0;
pub(crate) const DIR_ATTR: usize = 11;
pub(crate) const DIR_CRT_TIME: usize = 14;
pub(crate) const DIR_LST_ACC_DATE: usize = 18;
pub(crate) const DIR_FST_CLUS_HI: usize = 20;
pub(crate) const DIR_MOD_TIME: usize = 22;
pub(crate) const DIR_FST_CLUS_LO: usize = 26;
pub(crate) const DIR_FILE_SIZE: usize = 28;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FatType {
    Fat12,
    Fat16,
    Fat32,
}

impl FatType {
    /// Classifies a volume purely by its cluster count.
    pub fn from_cluster_count(clusters: u32) -> Option<Self> {
        if clusters <= MAX_FAT12 {
            Some(Self::Fat12)
        } else if clusters <= MAX_FAT16 {
            Some(Self::Fat16)
        } else if clusters <= MAX_FAT32 {
            Some(Self::Fat32)
        } else {
            None
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Attr: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
    }
}

impl Attr {
    /// Attributes a caller may change on an existing object.
    pub const CHANGEABLE: Self = Self::READ_ONLY
        .union(Self::HIDDEN)
        .union(Self::SYSTEM)
        .union(Self::ARCHIVE);
    pub(crate) const LONG_NAME: u8 = 0x0F;
    pub(crate) const MASK: u8 = 0x3F;
}

bitflags! {
    /// Access and disposition flags for [`FatFs::open`]. With none of the
    /// disposition flags set the file must already exist.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct OpenMode: u8 {
        const READ = 0x01;
        const WRITE = 0x02;
        const CREATE_NEW = 0x04;
        const CREATE_ALWAYS = 0x08;
        const OPEN_ALWAYS = 0x10;
        const OPEN_APPEND = 0x30;
    }
}

impl OpenMode {
    pub const OPEN_EXISTING: Self = Self::empty();
    pub(crate) const SEEK_END: Self = Self::from_bits_retain(0x20);
}

/// Metadata of one directory entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileInfo {
    pub size: u32,
    pub date: u16,
    pub time: u16,
    pub attr: Attr,
    /// 8.3 name as stored, with the dot restored (`README.TXT`).
    pub name: heapless::Vec<u8, 12>,
}

impl FileInfo {
    pub fn name_str(&self) -> Option<&str> {
        core::str::from_utf8(&self.name).ok()
    }

    pub fn is_dir(&self) -> bool {
        self.attr.contains(Attr::DIRECTORY)
    }
}

/// Geometry of a mounted volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VolumeInfo {
    pub fat_type: FatType,
    pub generation: u32,
    pub fat_count: u8,
    pub sectors_per_cluster: u32,
    /// Number of FAT entries, i.e. data clusters plus the two reserved ones.
    pub fat_entries: u32,
    pub fat_size: u32,
    pub root_entries: u32,
    pub volume_base: u32,
    pub fat_base: u32,
    /// Root directory start: a sector on FAT12/16, a cluster on FAT32.
    pub root_base: u32,
    pub data_base: u32,
}

impl VolumeInfo {
    pub fn cluster_count(&self) -> u32 {
        self.fat_entries - 2
    }

    pub fn cluster_bytes(&self) -> u32 {
        self.sectors_per_cluster * SECTOR_BYTES
    }
}

/// Source of timestamps for created and modified entries, packed as
/// `date << 16 | time` in FAT layout.
pub trait TimeSource {
    fn fat_timestamp(&self) -> u32;
}

/// Time source that always reports the same instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedTime(pub u32);

impl FixedTime {
    pub const fn from_date(year: u16, month: u8, day: u8) -> Self {
        let date = ((year.saturating_sub(1980) as u32) << 9) | ((month as u32) << 5) | day as u32;
        Self(date << 16)
    }
}

impl Default for FixedTime {
    fn default() -> Self {
        Self::from_date(2018, 1, 1)
    }
}

impl TimeSource for FixedTime {
    fn fat_timestamp(&self) -> u32 {
        self.0
    }
}

impl<F: Fn() -> u32> TimeSource for F {
    fn fat_timestamp(&self) -> u32 {
        self()
    }
}

pub(crate) fn ld_word(buf: &[u8], ofs: usize) -> u16 {
    u16::from_le_bytes([buf[ofs], buf[ofs + 1]])
}

pub(crate) fn ld_dword(buf: &[u8], ofs: usize) -> u32 {
    u32::from_le_bytes([buf[ofs], buf[ofs + 1], buf[ofs + 2], buf[ofs + 3]])
}

pub(crate) fn st_word(buf: &mut [u8], ofs: usize, value: u16) {
    buf[ofs..ofs + 2].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn st_dword(buf: &mut [u8], ofs: usize, value: u32) {
    buf[ofs..ofs + 4].copy_from_slice(&value.to_le_bytes());
}
