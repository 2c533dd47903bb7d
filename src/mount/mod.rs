//! Mount driver: kernel `mount`/`umount` syscalls, filesystem
//! detection/formatting, and enumeration of the live mount table.
//!
//! Mount-table enumeration uses `proc-mounts` rather than a bare
//! membership check, since callers need the filesystem type and option
//! set of each entry, not just whether a target path is mounted.

use std::path::Path;
use std::process::Command;

use proc_mounts::MountIter;
use sys_mount::{Mount, MountFlags, UnmountFlags};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MountError {
    #[error("unsupported filesystem: {0}")]
    UnsupportedFs(String),
    #[error("could not format device {device} as {fs_name}: {stderr}")]
    Format {
        device: String,
        fs_name: String,
        stderr: String,
    },
    #[error("mount failed: {0}")]
    Mount(#[from] std::io::Error),
    #[error("unmount failed: {0}")]
    Unmount(std::io::Error),
    #[error("target is busy: {0}")]
    Busy(String),
    #[error("target is already mounted: {0}")]
    AlreadyMounted(String),
}

/// A kernel-observable mount table entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mountpoint {
    pub source: String,
    pub target: String,
    pub fs_type: String,
    pub options: Vec<String>,
}

impl Mountpoint {
    pub fn is_readonly(&self) -> bool {
        self.options.iter().any(|opt| opt == "ro")
    }
}

/// Filesystem names this plugin is configured to format/mount.
pub fn supported_filesystems() -> Vec<String> {
    vec!["xfs".to_string(), "ext4".to_string()]
}

/// Probe a block device for an existing filesystem. `None` means
/// unformatted.
pub fn detect_fs(device: &str) -> Result<Option<String>, MountError> {
    let output = Command::new("blkid")
        .args(["-o", "value", "-s", "TYPE", device])
        .output()
        .map_err(MountError::Mount)?;

    // blkid exits 2 when no recognizable filesystem/label was found; that
    // is "unformatted", not an error.
    if !output.status.success() {
        return Ok(None);
    }

    let fs = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if fs.is_empty() {
        Ok(None)
    } else {
        Ok(Some(fs))
    }
}

/// Format `device` with `fs_name`. This is the only moment a device is
/// ever formatted: filesystems are never reformatted implicitly once
/// created.
pub fn format(device: &str, fs_name: &str) -> Result<(), MountError> {
    let program = match fs_name {
        "xfs" => "mkfs.xfs",
        "ext4" => "mkfs.ext4",
        other => return Err(MountError::UnsupportedFs(other.to_string())),
    };

    let output = Command::new(program)
        .arg("-f")
        .arg(device)
        .output()
        .map_err(MountError::Mount)?;

    if !output.status.success() {
        return Err(MountError::Format {
            device: device.to_string(),
            fs_name: fs_name.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(())
}

/// Mount a filesystem device at `target`.
pub fn mount_fs(
    device: &str,
    target: &str,
    fs_name: &str,
    readonly: bool,
    options: &[String],
) -> Result<(), MountError> {
    let mut flags = MountFlags::empty();
    if readonly {
        flags.insert(MountFlags::RDONLY);
    }

    let joined = options.join(",");

    let mut builder = Mount::builder().fstype(fs_name).flags(flags);
    if !joined.is_empty() {
        builder = builder.data(&joined);
    }
    builder.mount(device, target)?;

    Ok(())
}

/// Bind-mount a block device over an existing regular file (the Block
/// access type). Read-only bind mounts are not supported by the kernel
/// via mount flags alone; callers must reject this combination before
/// calling here.
pub fn bind_mount_block(source: &str, target: &str) -> Result<(), MountError> {
    let mut flags = MountFlags::empty();
    flags.insert(MountFlags::BIND);

    Mount::builder().fstype("none").flags(flags).mount(source, target)?;

    Ok(())
}

pub fn unmount(target: &str) -> Result<(), MountError> {
    sys_mount::unmount(target, UnmountFlags::empty()).map_err(MountError::Unmount)
}

/// Read and parse the kernel's live mount table. Treated as a snapshot:
/// callers must never assume stability across calls.
pub fn list_mounts() -> Result<Vec<Mountpoint>, MountError> {
    let iter = MountIter::new().map_err(MountError::Mount)?;
    let mut mounts = Vec::new();

    for entry in iter.flatten() {
        mounts.push(Mountpoint {
            source: entry.source.to_string_lossy().to_string(),
            target: entry.dest.to_string_lossy().to_string(),
            fs_type: entry.fstype,
            options: entry.options,
        });
    }

    Ok(mounts)
}

pub fn target_exists_as_dir(path: &str) -> bool {
    Path::new(path).is_dir()
}

pub fn target_exists_as_file(path: &str) -> bool {
    Path::new(path).is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readonly_flag_detection() {
        let mp = Mountpoint {
            source: "/dev/testvg/v1".into(),
            target: "/mnt/v1".into(),
            fs_type: "xfs".into(),
            options: vec!["rw".into(), "relatime".into()],
        };
        assert!(!mp.is_readonly());

        let mp = Mountpoint {
            options: vec!["ro".into()],
            ..mp
        };
        assert!(mp.is_readonly());
    }

    #[test]
    fn supported_filesystems_contains_defaults() {
        let fs = supported_filesystems();
        assert!(fs.contains(&"xfs".to_string()));
        assert!(fs.contains(&"ext4".to_string()));
    }
}
