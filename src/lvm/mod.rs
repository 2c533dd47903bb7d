//! LVM driver: a typed wrapper over the LVM2 command-line utilities used
//! for every VG/PV/LV mutation and query this plugin needs.

mod cli;
mod lock;
mod report;

use std::path::PathBuf;

use thiserror::Error;

use crate::names::{LvmName, Tag};
use cli::LvmCmd;
use lock::LvmLock;
use report::{LvSection, PvSection, Report, VgSection};

#[derive(Debug, Error)]
pub enum LvmError {
    #[error("volume group not found: {0}")]
    VgNotFound(String),
    #[error("physical volume not found: {0}")]
    PvNotFound(String),
    #[error("logical volume not found: {0}")]
    LvNotFound(String),
    #[error("invalid name: {0}")]
    InvalidName(String),
    #[error("not enough free extents in volume group")]
    NoSpace,
    #[error("requested mirror count exceeds the number of available physical volumes")]
    TooFewDisks,
    #[error("{command} failed: {stderr}")]
    Transient { command: String, stderr: String },
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("failed to parse {command} json output: {source}")]
    Json {
        command: String,
        source: serde_json::Error,
    },
    #[error("{command} produced no report entries")]
    EmptyReport { command: String },
    #[error("could not acquire lvm lock: {0}")]
    Lock(#[from] std::io::Error),
}

/// Requested physical layout of a new logical volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layout {
    Linear,
    Raid1 { mirrors: u32 },
}

impl Layout {
    /// Number of data copies this layout maintains (`m + 1` for RAID1).
    pub fn copies(&self) -> u64 {
        match self {
            Layout::Linear => 1,
            Layout::Raid1 { mirrors } => u64::from(*mirrors) + 1,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PhysicalVolumeInfo {
    pub path: String,
    pub size_bytes: u64,
    pub vg_name: Option<String>,
}

#[derive(Clone, Debug)]
pub struct VolumeGroupInfo {
    pub name: String,
    pub pvs: Vec<String>,
    pub tags: Vec<String>,
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub extent_size: u64,
    pub extent_count: u64,
    pub free_extent_count: u64,
}

#[derive(Clone, Debug)]
pub struct LogicalVolumeInfo {
    pub vg_name: String,
    /// On-disk LV name, i.e. `<VG>_<user-name>`.
    pub name: String,
    pub size_bytes: u64,
    pub path: String,
    pub tags: Vec<String>,
}

/// Round `bytes` up to the next multiple of `extent_size`.
pub fn round_up_to_extent(bytes: u64, extent_size: u64) -> u64 {
    if extent_size == 0 || bytes == 0 {
        return 0;
    }
    ((bytes + extent_size - 1) / extent_size) * extent_size
}

/// Extents needed to hold `bytes`, before any RAID copy multiplier.
pub fn extents_needed(bytes: u64, extent_size: u64) -> u64 {
    if extent_size == 0 {
        return 0;
    }
    (bytes + extent_size - 1) / extent_size
}

pub struct LvmDriver {
    lock: LvmLock,
}

impl LvmDriver {
    pub fn new(lock_path: PathBuf) -> Self {
        Self {
            lock: LvmLock::new(lock_path),
        }
    }

    /// Refresh the LVM device cache for the given candidate devices.
    pub fn scan_devices(&self, devices: &[String]) -> Result<(), LvmError> {
        self.lock.with_lock(|| {
            LvmCmd::new("pvscan").arg("--cache").args(devices).run()?;
            LvmCmd::new("vgscan").run()
        })
    }

    pub fn pv_create(&self, device: &str) -> Result<(), LvmError> {
        self.lock
            .with_lock(|| LvmCmd::new("pvcreate").arg("-ff").arg("-y").arg(device).run())
    }

    pub fn pv_remove(&self, device: &str) -> Result<(), LvmError> {
        self.lock.with_lock(|| LvmCmd::new("pvremove").arg(device).run())
    }

    /// List every PV known to LVM, regardless of which VG (if any) it
    /// belongs to. Used to detect PVs held by a foreign VG.
    pub fn list_all_pvs(&self) -> Result<Vec<PhysicalVolumeInfo>, LvmError> {
        self.lock.with_lock(|| {
            let report: Report<PvSection> = LvmCmd::new("pvs")
                .json_report()
                .args(["-o", "pv_name,vg_name,pv_size,pv_uuid"])
                .output_json()?;

            let section = report.into_first("pvs")?;
            Ok(section
                .pv
                .into_iter()
                .map(|raw| PhysicalVolumeInfo {
                    path: raw.pv_name,
                    size_bytes: raw.pv_size,
                    vg_name: if raw.vg_name.is_empty() {
                        None
                    } else {
                        Some(raw.vg_name)
                    },
                })
                .collect())
        })
    }

    pub fn lookup_vg(&self, vg: &LvmName) -> Result<Option<VolumeGroupInfo>, LvmError> {
        let result = self.lock.with_lock(|| {
            let report: Report<VgSection> = LvmCmd::new("vgs")
                .json_report()
                .args([
                    "-o",
                    "vg_name,vg_size,vg_free,vg_extent_size,vg_extent_count,vg_free_count,vg_tags,vg_uuid",
                ])
                .arg(vg.as_str())
                .output_json()?;

            let section = report.into_first("vgs")?;
            let raw = section.vg.into_iter().next().ok_or_else(|| LvmError::VgNotFound(vg.to_string()))?;

            let pvs = self.list_pvs_for_vg_locked(vg)?;

            Ok(VolumeGroupInfo {
                name: raw.vg_name.clone(),
                pvs,
                tags: raw.tags(),
                total_bytes: raw.vg_size,
                free_bytes: raw.vg_free,
                extent_size: raw.vg_extent_size,
                extent_count: raw.vg_extent_count,
                free_extent_count: raw.vg_free_count,
            })
        });

        match result {
            Ok(info) => Ok(Some(info)),
            Err(LvmError::VgNotFound(_)) => Ok(None),
            Err(other) => Err(other),
        }
    }

    /// Must only be called from within `self.lock.with_lock`.
    fn list_pvs_for_vg_locked(&self, vg: &LvmName) -> Result<Vec<String>, LvmError> {
        let report: Report<PvSection> = LvmCmd::new("pvs")
            .json_report()
            .args(["-o", "pv_name,vg_name"])
            .arg("--select")
            .arg(format!("vg_name={}", vg.as_str()))
            .output_json()?;

        let section = report.into_first("pvs")?;
        Ok(section.pv.into_iter().map(|raw| raw.pv_name).collect())
    }

    pub fn vg_create(&self, vg: &LvmName, devices: &[String], tags: &[Tag]) -> Result<(), LvmError> {
        self.lock.with_lock(|| {
            let mut cmd = LvmCmd::new("vgcreate");
            for tag in tags {
                cmd = cmd.arg("--addtag").arg(tag.as_str());
            }
            cmd.arg(vg.as_str()).args(devices).run()
        })
    }

    pub fn vg_remove(&self, vg: &LvmName) -> Result<(), LvmError> {
        self.lock.with_lock(|| LvmCmd::new("vgremove").arg("-f").arg(vg.as_str()).run())
    }

    pub fn list_lvs(&self, vg: &LvmName) -> Result<Vec<LogicalVolumeInfo>, LvmError> {
        self.lock.with_lock(|| {
            let report: Report<LvSection> = LvmCmd::new("lvs")
                .json_report()
                .args(["-o", "lv_name,vg_name,lv_size,lv_path,lv_tags"])
                .arg(vg.as_str())
                .output_json()?;

            let section = report.into_first("lvs")?;
            Ok(section.lv.into_iter().map(raw_to_lv_info).collect())
        })
    }

    pub fn lookup_lv(&self, vg: &LvmName, disk_name: &str) -> Result<Option<LogicalVolumeInfo>, LvmError> {
        let result = self.lock.with_lock(|| {
            let report: Report<LvSection> = LvmCmd::new("lvs")
                .json_report()
                .args(["-o", "lv_name,vg_name,lv_size,lv_path,lv_tags"])
                .arg(format!("{}/{}", vg.as_str(), disk_name))
                .output_json()?;

            let section = report.into_first("lvs")?;
            section
                .lv
                .into_iter()
                .next()
                .map(raw_to_lv_info)
                .ok_or_else(|| LvmError::LvNotFound(disk_name.to_string()))
        });

        match result {
            Ok(info) => Ok(Some(info)),
            Err(LvmError::LvNotFound(_)) => Ok(None),
            Err(other) => Err(other),
        }
    }

    /// Create a new LV. `vg_free_extents`, `vg_extent_size` and
    /// `vg_pv_count` are passed in by the caller (already holding an
    /// up-to-date [`VolumeGroupInfo`]) so the space/mirror-count checks can
    /// be performed before ever invoking `lvcreate`.
    pub fn lv_create(
        &self,
        vg: &LvmName,
        disk_name: &str,
        size_bytes: u64,
        tags: &[Tag],
        layout: Layout,
        pv_allowlist: &[String],
        vg_free_extents: u64,
        vg_extent_size: u64,
        vg_pv_count: usize,
    ) -> Result<LogicalVolumeInfo, LvmError> {
        let requested_extents = if size_bytes == 0 {
            vg_free_extents / layout.copies()
        } else {
            extents_needed(size_bytes, vg_extent_size)
        };

        if let Layout::Raid1 { mirrors } = layout {
            let available_pvs = if pv_allowlist.is_empty() { vg_pv_count } else { pv_allowlist.len() };
            if (mirrors as usize) + 1 > available_pvs {
                return Err(LvmError::TooFewDisks);
            }
        }

        let total_extents = requested_extents * layout.copies();
        if total_extents == 0 || total_extents > vg_free_extents {
            return Err(LvmError::NoSpace);
        }

        self.lock.with_lock(|| {
            let mut cmd = LvmCmd::new("lvcreate")
                .arg("-y")
                .arg("-n")
                .arg(disk_name)
                .arg("-l")
                .arg(requested_extents.to_string());

            if let Layout::Raid1 { mirrors } = layout {
                cmd = cmd.arg("--type").arg("raid1").arg("-m").arg(mirrors.to_string());
            }

            for tag in tags {
                cmd = cmd.arg("--addtag").arg(tag.as_str());
            }

            cmd = cmd.arg(vg.as_str());
            cmd = cmd.args(pv_allowlist);

            cmd.run()
        })?;

        self.lookup_lv(vg, disk_name)?
            .ok_or_else(|| LvmError::LvNotFound(disk_name.to_string()))
    }

    pub fn lv_remove(&self, vg: &LvmName, disk_name: &str) -> Result<(), LvmError> {
        self.lock
            .with_lock(|| LvmCmd::new("lvremove").arg("-f").arg(format!("{}/{}", vg.as_str(), disk_name)).run())
    }
}

fn raw_to_lv_info(raw: report::LvRaw) -> LogicalVolumeInfo {
    let tags = raw.tags();
    LogicalVolumeInfo {
        vg_name: raw.vg_name,
        name: raw.lv_name,
        size_bytes: raw.lv_size,
        path: raw.lv_path,
        tags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_up_to_extent_multiple() {
        assert_eq!(round_up_to_extent(1, 4 * 1024 * 1024), 4 * 1024 * 1024);
        assert_eq!(round_up_to_extent(4 * 1024 * 1024, 4 * 1024 * 1024), 4 * 1024 * 1024);
        assert_eq!(round_up_to_extent(4 * 1024 * 1024 + 1, 4 * 1024 * 1024), 8 * 1024 * 1024);
        assert_eq!(round_up_to_extent(0, 4 * 1024 * 1024), 0);
    }

    #[test]
    fn extents_needed_rounds_up() {
        let extent = 4 * 1024 * 1024;
        assert_eq!(extents_needed(1, extent), 1);
        assert_eq!(extents_needed(extent, extent), 1);
        assert_eq!(extents_needed(extent + 1, extent), 2);
    }

    #[test]
    fn layout_copies() {
        assert_eq!(Layout::Linear.copies(), 1);
        assert_eq!(Layout::Raid1 { mirrors: 1 }.copies(), 2);
        assert_eq!(Layout::Raid1 { mirrors: 2 }.copies(), 3);
    }
}
