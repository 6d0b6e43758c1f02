use log::{debug, info};

use super::{name, volume::Volume, FatError, FatResult, FixedTime, TimeSource, VolumeInfo};
use crate::disk::{BlockDevice, DiskStatus};

/// Identity of an open file or directory: which drive it lives on, the
/// mount generation it was opened under, and the object's own location.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ObjectId {
    pub(crate) drive: u8,
    pub(crate) generation: u32,
    pub(crate) attr: u8,
    pub(crate) sclust: u32,
    pub(crate) objsize: u32,
}

impl ObjectId {
    pub(crate) const fn closed() -> Self {
        Self {
            drive: 0,
            generation: 0,
            attr: 0,
            sclust: 0,
            objsize: 0,
        }
    }
}

/// Filesystem context: one volume slot per block device, plus the clock
/// used to stamp modified entries.
///
/// Handles returned by [`FatFs::open`] and [`FatFs::opendir`] carry the
/// generation of the mount they were created under and are rejected with
/// [`FatError::InvalidObject`] once the volume is remounted or unmounted.
pub struct FatFs<D, T = FixedTime, const VOLUMES: usize = 1> {
    pub(crate) volumes: [Volume<D>; VOLUMES],
    pub(crate) time: T,
    next_generation: u32,
}

impl<D: BlockDevice, const VOLUMES: usize> FatFs<D, FixedTime, VOLUMES> {
    pub fn new(devices: [D; VOLUMES]) -> Self {
        Self::with_time_source(devices, FixedTime::default())
    }
}

impl<D: BlockDevice, T: TimeSource, const VOLUMES: usize> FatFs<D, T, VOLUMES> {
    pub fn with_time_source(devices: [D; VOLUMES], time: T) -> Self {
        Self {
            volumes: devices.map(Volume::new),
            time,
            next_generation: 0,
        }
    }

    /// Registers the drive and mounts it right away.
    pub fn mount(&mut self, drive: u8) -> FatResult<()> {
        self.register(drive)?;
        self.find_volume(usize::from(drive), false).map(|_| ())
    }

    /// Registers the drive without touching the device; the volume is
    /// mounted by the first operation that needs it.
    pub fn register(&mut self, drive: u8) -> FatResult<()> {
        let vol = self.slot_mut(drive)?;
        vol.registered = true;
        vol.fs_type = None;
        Ok(())
    }

    /// Drops the work area of the drive. Pending window data is discarded;
    /// close files first.
    pub fn unmount(&mut self, drive: u8) -> FatResult<()> {
        let vol = self.slot_mut(drive)?;
        vol.registered = false;
        vol.fs_type = None;
        debug!("fat: unmounted drive={}", drive);
        Ok(())
    }

    pub fn volume_info(&mut self, drive: u8) -> FatResult<VolumeInfo> {
        self.find_volume(usize::from(drive), false)?.info()
    }

    pub fn device(&self, drive: u8) -> Option<&D> {
        self.volumes.get(usize::from(drive)).map(|vol| &vol.disk)
    }

    pub fn device_mut(&mut self, drive: u8) -> Option<&mut D> {
        self.volumes
            .get_mut(usize::from(drive))
            .map(|vol| &mut vol.disk)
    }

    pub fn into_devices(self) -> [D; VOLUMES] {
        self.volumes.map(|vol| vol.disk)
    }

    fn slot_mut(&mut self, drive: u8) -> FatResult<&mut Volume<D>> {
        self.volumes
            .get_mut(usize::from(drive))
            .ok_or(FatError::InvalidDrive)
    }

    pub(crate) fn timestamp(&self) -> u32 {
        self.time.fat_timestamp()
    }

    /// Resolves the drive prefix of `path` and returns the mounted volume
    /// with the remaining path.
    pub(crate) fn resolve<'p>(
        &mut self,
        path: &'p str,
        write: bool,
    ) -> FatResult<(usize, &'p [u8])> {
        let (drive, rest) = name::split_drive(path, VOLUMES)?;
        self.find_volume(drive, write)?;
        Ok((drive, rest))
    }

    /// Returns the volume of `drive`, mounting it first when it is not
    /// mounted or its medium was re-initialized.
    pub(crate) fn find_volume(&mut self, drive: usize, write: bool) -> FatResult<&mut Volume<D>> {
        let generation = self.next_generation.wrapping_add(1).max(1);
        let vol = self.volumes.get_mut(drive).ok_or(FatError::InvalidDrive)?;
        if !vol.registered {
            return Err(FatError::NotEnabled);
        }

        if vol.fs_type.is_some() {
            let stat = vol.disk.status();
            if !stat.contains(DiskStatus::NOT_INITIALIZED) {
                if write && stat.contains(DiskStatus::WRITE_PROTECTED) {
                    return Err(FatError::WriteProtected);
                }
                return Ok(vol);
            }
        }

        vol.fs_type = None;
        let stat = vol.disk.initialize();
        if stat.contains(DiskStatus::NOT_INITIALIZED) {
            return Err(FatError::NotReady);
        }
        if write && stat.contains(DiskStatus::WRITE_PROTECTED) {
            return Err(FatError::WriteProtected);
        }
        vol.mount(generation)?;
        self.next_generation = generation;
        info!("fat: volume_ready drive={} gen={}", drive, generation);
        Ok(vol)
    }

    /// Checks that a handle still belongs to the live mount of its drive.
    pub(crate) fn validate(&mut self, obj: &ObjectId) -> FatResult<&mut Volume<D>> {
        let vol = self
            .volumes
            .get_mut(usize::from(obj.drive))
            .ok_or(FatError::InvalidObject)?;
        if obj.generation == 0 || obj.generation != vol.id || !vol.is_live() {
            return Err(FatError::InvalidObject);
        }
        Ok(vol)
    }
}
