//! Minimal FAT formatter used to build test images.

use spi_fatfs::FatType;

use super::Image;

#[derive(Clone, Debug)]
pub struct Format {
    pub fat_type: FatType,
    pub total_sectors: u32,
    pub sectors_per_cluster: u8,
    pub fats: u8,
    pub root_entries: u16,
    pub reserved: u16,
    /// Start of the volume inside an MBR partition; `None` formats the whole
    /// medium without a partition table.
    pub partition_start: Option<u32>,
    pub label: Option<[u8; 11]>,
    pub serial: u32,
    pub fsinfo: bool,
    /// Fixed FAT size in sectors instead of the computed minimum.
    pub fat_sectors: Option<u32>,
}

impl Format {
    pub fn fat12() -> Self {
        Self {
            fat_type: FatType::Fat12,
            total_sectors: 8192,
            sectors_per_cluster: 4,
            fats: 2,
            root_entries: 512,
            reserved: 1,
            partition_start: None,
            label: None,
            serial: 0x1234_5678,
            fsinfo: false,
            fat_sectors: None,
        }
    }

    pub fn fat16() -> Self {
        Self {
            fat_type: FatType::Fat16,
            total_sectors: 32768,
            sectors_per_cluster: 4,
            root_entries: 512,
            ..Self::fat12()
        }
    }

    pub fn fat32() -> Self {
        Self {
            fat_type: FatType::Fat32,
            total_sectors: 70_000,
            sectors_per_cluster: 1,
            root_entries: 0,
            reserved: 32,
            fsinfo: true,
            ..Self::fat12()
        }
    }

    pub fn total(mut self, sectors: u32) -> Self {
        self.total_sectors = sectors;
        self
    }

    pub fn cluster(mut self, sectors: u8) -> Self {
        self.sectors_per_cluster = sectors;
        self
    }

    pub fn root_entries(mut self, entries: u16) -> Self {
        self.root_entries = entries;
        self
    }

    pub fn fats(mut self, fats: u8) -> Self {
        self.fats = fats;
        self
    }

    pub fn partitioned(mut self, start: u32) -> Self {
        self.partition_start = Some(start);
        self
    }

    pub fn label(mut self, label: &[u8; 11]) -> Self {
        self.label = Some(*label);
        self
    }

    /// Sizes the medium so the volume holds exactly `clusters` data clusters.
    pub fn with_clusters(mut self, clusters: u32) -> Self {
        let fsz = self.fat_bytes(clusters + 2).div_ceil(512);
        self.fat_sectors = Some(fsz);
        self.total_sectors = self.partition_start.unwrap_or(0)
            + u32::from(self.reserved)
            + u32::from(self.fats) * fsz
            + self.root_sectors()
            + clusters * u32::from(self.sectors_per_cluster);
        self
    }

    pub fn root_sectors(&self) -> u32 {
        (u32::from(self.root_entries) * 32).div_ceil(512)
    }

    fn fat_bytes(&self, entries: u32) -> u32 {
        match self.fat_type {
            FatType::Fat12 => entries * 3 / 2 + (entries & 1),
            FatType::Fat16 => entries * 2,
            FatType::Fat32 => entries * 4,
        }
    }

    pub fn volume_sectors(&self) -> u32 {
        self.total_sectors - self.partition_start.unwrap_or(0)
    }

    /// Sectors per FAT, grown until the table covers every cluster.
    pub fn fat_size(&self) -> u32 {
        if let Some(fsz) = self.fat_sectors {
            return fsz;
        }
        let spc = u32::from(self.sectors_per_cluster);
        let mut fsz = 1;
        loop {
            let overhead =
                u32::from(self.reserved) + u32::from(self.fats) * fsz + self.root_sectors();
            let clusters = (self.volume_sectors() - overhead) / spc;
            let needed = self.fat_bytes(clusters + 2).div_ceil(512);
            if needed <= fsz {
                return fsz;
            }
            fsz = needed;
        }
    }

    pub fn cluster_count(&self) -> u32 {
        let overhead = u32::from(self.reserved)
            + u32::from(self.fats) * self.fat_size()
            + self.root_sectors();
        (self.volume_sectors() - overhead) / u32::from(self.sectors_per_cluster)
    }

    pub fn build(&self) -> Image {
        let mut image = Image::new(self.total_sectors);
        let base = self.partition_start.unwrap_or(0);
        let fsz = self.fat_size();
        let fat32 = self.fat_type == FatType::Fat32;

        if let Some(start) = self.partition_start {
            let mbr = image.sector_mut(0);
            let pte = 446;
            mbr[pte] = 0x00;
            mbr[pte + 4] = match self.fat_type {
                FatType::Fat12 => 0x01,
                FatType::Fat16 => 0x06,
                FatType::Fat32 => 0x0C,
            };
            mbr[pte + 8..pte + 12].copy_from_slice(&start.to_le_bytes());
            mbr[pte + 12..pte + 16].copy_from_slice(&self.volume_sectors().to_le_bytes());
            mbr[510] = 0x55;
            mbr[511] = 0xAA;
        }

        let vbr = image.sector_mut(base);
        vbr[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
        vbr[3..11].copy_from_slice(b"MSWIN4.1");
        vbr[11..13].copy_from_slice(&512u16.to_le_bytes());
        vbr[13] = self.sectors_per_cluster;
        vbr[14..16].copy_from_slice(&self.reserved.to_le_bytes());
        vbr[16] = self.fats;
        vbr[17..19].copy_from_slice(&self.root_entries.to_le_bytes());
        let volume = self.volume_sectors();
        if volume < 0x10000 && !fat32 {
            vbr[19..21].copy_from_slice(&(volume as u16).to_le_bytes());
        } else {
            vbr[32..36].copy_from_slice(&volume.to_le_bytes());
        }
        vbr[21] = 0xF8;
        vbr[28..32].copy_from_slice(&base.to_le_bytes());
        let label = self.label.unwrap_or(*b"NO NAME    ");
        if fat32 {
            vbr[36..40].copy_from_slice(&fsz.to_le_bytes());
            vbr[44..48].copy_from_slice(&2u32.to_le_bytes());
            vbr[48..50].copy_from_slice(&1u16.to_le_bytes());
            vbr[50..52].copy_from_slice(&6u16.to_le_bytes());
            vbr[64] = 0x80;
            vbr[66] = 0x29;
            vbr[67..71].copy_from_slice(&self.serial.to_le_bytes());
            vbr[71..82].copy_from_slice(&label);
            vbr[82..90].copy_from_slice(b"FAT32   ");
        } else {
            vbr[22..24].copy_from_slice(&(fsz as u16).to_le_bytes());
            vbr[36] = 0x80;
            vbr[38] = 0x29;
            vbr[39..43].copy_from_slice(&self.serial.to_le_bytes());
            vbr[43..54].copy_from_slice(&label);
            let name: &[u8; 8] = if self.fat_type == FatType::Fat12 {
                b"FAT12   "
            } else {
                b"FAT16   "
            };
            vbr[54..62].copy_from_slice(name);
        }
        vbr[510] = 0x55;
        vbr[511] = 0xAA;

        if fat32 && self.fsinfo {
            let fsi = image.sector_mut(base + 1);
            fsi[0..4].copy_from_slice(&0x4161_5252u32.to_le_bytes());
            fsi[484..488].copy_from_slice(&0x6141_7272u32.to_le_bytes());
            // Root directory already owns cluster 2.
            let free = self.cluster_count() - 1;
            fsi[488..492].copy_from_slice(&free.to_le_bytes());
            fsi[492..496].copy_from_slice(&2u32.to_le_bytes());
            fsi[510] = 0x55;
            fsi[511] = 0xAA;
        }

        let fat_base = base + u32::from(self.reserved);
        for copy in 0..u32::from(self.fats) {
            let first = image.sector_mut(fat_base + copy * fsz);
            match self.fat_type {
                FatType::Fat12 => first[0..3].copy_from_slice(&[0xF8, 0xFF, 0xFF]),
                FatType::Fat16 => first[0..4].copy_from_slice(&[0xF8, 0xFF, 0xFF, 0xFF]),
                FatType::Fat32 => {
                    first[0..4].copy_from_slice(&0x0FFF_FFF8u32.to_le_bytes());
                    first[4..8].copy_from_slice(&0x0FFF_FFFFu32.to_le_bytes());
                    first[8..12].copy_from_slice(&0x0FFF_FFFFu32.to_le_bytes());
                }
            }
        }

        if let Some(label) = self.label {
            let root = self.root_sector();
            let dir = image.sector_mut(root);
            dir[0..11].copy_from_slice(&label);
            dir[11] = 0x08;
        }
        image
    }

    pub fn fat_base(&self) -> u32 {
        self.partition_start.unwrap_or(0) + u32::from(self.reserved)
    }

    /// First sector of the root directory.
    pub fn root_sector(&self) -> u32 {
        let data = self.data_base();
        if self.fat_type == FatType::Fat32 {
            data
        } else {
            data - self.root_sectors()
        }
    }

    pub fn data_base(&self) -> u32 {
        self.fat_base() + u32::from(self.fats) * self.fat_size() + self.root_sectors()
    }

    pub fn cluster_sector(&self, cluster: u32) -> u32 {
        self.data_base() + (cluster - 2) * u32::from(self.sectors_per_cluster)
    }
}

/// Raw FAT entry of `cluster` in the first FAT copy of `image`.
pub fn fat_entry(image: &Image, fmt: &Format, cluster: u32) -> u32 {
    let base = fmt.fat_base();
    match fmt.fat_type {
        FatType::Fat12 => {
            let bc = cluster + cluster / 2;
            let lo = image.sector(base + bc / 512)[(bc % 512) as usize];
            let hi = image.sector(base + (bc + 1) / 512)[((bc + 1) % 512) as usize];
            let wc = u32::from(u16::from_le_bytes([lo, hi]));
            if cluster & 1 != 0 {
                wc >> 4
            } else {
                wc & 0xFFF
            }
        }
        FatType::Fat16 => {
            let ofs = cluster * 2;
            let s = image.sector(base + ofs / 512);
            let p = (ofs % 512) as usize;
            u32::from(u16::from_le_bytes([s[p], s[p + 1]]))
        }
        FatType::Fat32 => {
            let ofs = cluster * 4;
            let s = image.sector(base + ofs / 512);
            let p = (ofs % 512) as usize;
            u32::from_le_bytes([s[p], s[p + 1], s[p + 2], s[p + 3]]) & 0x0FFF_FFFF
        }
    }
}

/// Follows a cluster chain from `start` until an end marker.
pub fn chain(image: &Image, fmt: &Format, start: u32) -> Vec<u32> {
    let limit = fmt.cluster_count() + 2;
    let mut out = Vec::new();
    let mut clst = start;
    while clst >= 2 && clst < limit && out.len() <= limit as usize {
        out.push(clst);
        clst = fat_entry(image, fmt, clst);
    }
    out
}
