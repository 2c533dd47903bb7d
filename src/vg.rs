//! VG lifecycle manager: the startup reconciliation state machine that
//! validates or constructs the managed volume group, plus the "remove
//! volume group" teardown path and the read-only checks Probe re-runs.

use std::collections::HashSet;
use std::path::Path;
use std::sync::RwLock;

use thiserror::Error;

use crate::lvm::{LvmDriver, LvmError};
use crate::mount;
use crate::names::{strip_vg_prefix, LvmName, NameError, Tag};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("bad plugin configuration: {0}")]
    BadConfig(String),
    #[error(transparent)]
    Lvm(#[from] LvmError),
    #[error(transparent)]
    Name(#[from] NameError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Active,
    Removing,
    Failed,
}

/// Startup configuration plus the runtime lifecycle state of the volume
/// group this instance manages. No LV listing is cached here; every query
/// re-reads LVM — this struct only remembers what was asked for
/// at startup, for comparison against what's on disk.
pub struct VgManager {
    pub vg: LvmName,
    pub devices: Vec<String>,
    pub tags: Vec<Tag>,
    state: RwLock<LifecycleState>,
}

impl VgManager {
    pub fn new(vg: LvmName, devices: Vec<String>, tags: Vec<Tag>) -> Self {
        Self {
            vg,
            devices,
            tags,
            state: RwLock::new(LifecycleState::Uninitialized),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.read().expect("vg lifecycle lock poisoned")
    }

    fn set_state(&self, state: LifecycleState) {
        *self.state.write().expect("vg lifecycle lock poisoned") = state;
    }

    /// Run the startup reconciliation procedure. Must be
    /// called exactly once, before the gRPC server starts accepting
    /// requests.
    pub fn reconcile(&self, lvm: &LvmDriver, remove_mode: bool) -> Result<(), ReconcileError> {
        let result = if remove_mode {
            self.reconcile_remove(lvm)
        } else {
            self.reconcile_active(lvm)
        };

        if result.is_err() {
            self.set_state(LifecycleState::Failed);
        }

        result
    }

    fn reconcile_remove(&self, lvm: &LvmDriver) -> Result<(), ReconcileError> {
        if lvm.lookup_vg(&self.vg)?.is_some() {
            for lv in lvm.list_lvs(&self.vg)? {
                let user_name = strip_vg_prefix(&self.vg, &lv.name).unwrap_or(&lv.name);
                log::info!("removing logical volume {user_name} before tearing down {}", self.vg);
                lvm.lv_remove(&self.vg, &lv.name)?;
            }
            lvm.vg_remove(&self.vg)?;
        }

        self.set_state(LifecycleState::Removing);
        Ok(())
    }

    fn reconcile_active(&self, lvm: &LvmDriver) -> Result<(), ReconcileError> {
        lvm.scan_devices(&self.devices)?;

        match lvm.lookup_vg(&self.vg)? {
            None => {
                self.initialize_pvs(lvm)?;
                lvm.vg_create(&self.vg, &self.devices, &self.tags)?;
                self.set_state(LifecycleState::Active);
                Ok(())
            }
            Some(info) => {
                check_pv_set(&self.devices, &info.pvs)?;
                check_tag_superset(&self.tags, &info.tags)?;
                self.set_state(LifecycleState::Active);
                Ok(())
            }
        }
    }

    /// Wipe and `pvcreate` every candidate device that isn't already a bare
    /// PV, failing loudly on any device that's missing, mounted, or owned
    /// by a foreign VG.
    fn initialize_pvs(&self, lvm: &LvmDriver) -> Result<(), ReconcileError> {
        let all_pvs = lvm.list_all_pvs()?;
        let mounts = mount::list_mounts().map_err(|err| ReconcileError::BadConfig(err.to_string()))?;

        for device in &self.devices {
            if !Path::new(device).exists() {
                return Err(ReconcileError::BadConfig(format!("candidate device {device} does not exist")));
            }
            if mounts.iter().any(|m| &m.source == device) {
                return Err(ReconcileError::BadConfig(format!("candidate device {device} is currently mounted")));
            }

            match all_pvs.iter().find(|pv| &pv.path == device) {
                Some(pv) if pv.vg_name.is_some() => {
                    return Err(ReconcileError::BadConfig(format!(
                        "candidate device {device} already belongs to volume group {}",
                        pv.vg_name.as_deref().unwrap_or_default()
                    )));
                }
                Some(_) => {} // already a bare PV
                None => lvm.pv_create(device)?,
            }
        }

        Ok(())
    }

    /// Re-run the reconciliation checks read-only. Called by Probe.
    pub fn probe(&self, lvm: &LvmDriver) -> Result<(), ReconcileError> {
        if self.state() == LifecycleState::Removing {
            return if lvm.lookup_vg(&self.vg)?.is_some() {
                Err(ReconcileError::BadConfig(format!(
                    "volume group {} still exists after removal",
                    self.vg
                )))
            } else {
                Ok(())
            };
        }

        match lvm.lookup_vg(&self.vg)? {
            None => Err(ReconcileError::BadConfig(format!("volume group {} not found", self.vg))),
            Some(info) => {
                check_pv_set(&self.devices, &info.pvs)?;
                for device in &info.pvs {
                    if !Path::new(device).exists() {
                        return Err(ReconcileError::BadConfig(format!("physical volume {device} is no longer readable")));
                    }
                }
                Ok(())
            }
        }
    }
}

/// Compare the configured candidate device set against what's on disk,
/// reporting the exact symmetric difference.
fn check_pv_set(configured: &[String], on_disk: &[String]) -> Result<(), ReconcileError> {
    let configured_set: HashSet<&str> = configured.iter().map(String::as_str).collect();
    let on_disk_set: HashSet<&str> = on_disk.iter().map(String::as_str).collect();

    if configured_set == on_disk_set {
        return Ok(());
    }

    let mut missing: Vec<&str> = configured_set.difference(&on_disk_set).copied().collect();
    let mut unexpected: Vec<&str> = on_disk_set.difference(&configured_set).copied().collect();
    missing.sort_unstable();
    unexpected.sort_unstable();

    Err(ReconcileError::BadConfig(format!(
        "volume group physical volume set mismatch: unexpected={unexpected:?}, missing={missing:?}"
    )))
}

fn check_tag_superset(requested: &[Tag], on_disk: &[String]) -> Result<(), ReconcileError> {
    let on_disk_set: HashSet<&str> = on_disk.iter().map(String::as_str).collect();
    let mut missing: Vec<&str> = requested.iter().map(Tag::as_str).filter(|t| !on_disk_set.contains(t)).collect();
    missing.sort_unstable();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ReconcileError::BadConfig(format!("volume group is missing required tags: {missing:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pv_set_equal_passes() {
        let configured = vec!["/dev/loopA".to_string(), "/dev/loopB".to_string()];
        let on_disk = vec!["/dev/loopB".to_string(), "/dev/loopA".to_string()];
        assert!(check_pv_set(&configured, &on_disk).is_ok());
    }

    #[test]
    fn pv_set_mismatch_reports_symmetric_difference() {
        let configured = vec!["/dev/loopA".to_string(), "/dev/loopB".to_string(), "/dev/missing".to_string()];
        let on_disk = vec!["/dev/loopA".to_string(), "/dev/loopB".to_string()];

        let err = check_pv_set(&configured, &on_disk).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("missing=[\"/dev/missing\"]"));
        assert!(msg.contains("unexpected=[]"));
    }

    #[test]
    fn tag_superset_allows_extra_on_disk_tags() {
        let requested = vec![Tag::try_from("env.prod").unwrap()];
        let on_disk = vec!["env.prod".to_string(), "owner.team-a".to_string()];
        assert!(check_tag_superset(&requested, &on_disk).is_ok());
    }

    #[test]
    fn tag_superset_rejects_missing_tag() {
        let requested = vec![Tag::try_from("env.prod").unwrap()];
        let on_disk = vec!["owner.team-a".to_string()];
        assert!(check_tag_superset(&requested, &on_disk).is_err());
    }
}
