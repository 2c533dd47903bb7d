//! Thin synchronous wrapper over the LVM2 command-line utilities.
//!
//! Every invocation requests JSON output with byte-unit normalization so
//! the driver never depends on human-readable formatting; the one thing it
//! does still read from human text is stderr, for error classification.

use std::ffi::OsStr;
use std::process::{Command, Output};

use super::LvmError;

pub struct LvmCmd {
    name: &'static str,
    cmd: Command,
}

impl LvmCmd {
    pub fn new(name: &'static str) -> Self {
        let mut cmd = Command::new(name);
        cmd.env("LC_ALL", "C");
        Self { name, cmd }
    }

    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.cmd.arg(arg);
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.cmd.args(args);
        self
    }

    /// Append the standard reporting flags for a JSON query command.
    pub fn json_report(self) -> Self {
        self.args(["--reportformat", "json", "--units", "b", "--nosuffix"])
    }

    pub fn run(self) -> Result<(), LvmError> {
        self.output().map(|_| ())
    }

    pub fn output_json<T>(self) -> Result<T, LvmError>
    where
        T: for<'de> serde::de::Deserialize<'de>,
    {
        let name = self.name;
        let output = self.output()?;
        serde_json::from_slice(&output.stdout).map_err(|source| LvmError::Json {
            command: name.to_string(),
            source,
        })
    }

    pub fn output(mut self) -> Result<Output, LvmError> {
        log::debug!("running: {:?}", self.cmd);

        let output = self.cmd.output().map_err(|source| LvmError::Spawn {
            command: self.name.to_string(),
            source,
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(classify(self.name, &stderr));
        }

        Ok(output)
    }
}

/// Map a non-zero exit's stderr to the driver's error taxonomy. The
/// quoted patterns are matched verbatim so operator-visible error
/// messages stay stable across LVM2 versions.
fn classify(command: &str, stderr: &str) -> LvmError {
    if stderr.contains("Volume group") && stderr.contains("not found") {
        return LvmError::VgNotFound(stderr.to_string());
    }
    if stderr.contains("Failed to find device") {
        return LvmError::PvNotFound(stderr.to_string());
    }
    if stderr.contains("Failed to find logical volume") {
        return LvmError::LvNotFound(stderr.to_string());
    }
    if stderr.starts_with("Name contains invalid character") {
        return LvmError::InvalidName(stderr.to_string());
    }
    if stderr.contains("Insufficient") {
        return LvmError::NoSpace;
    }

    LvmError::Transient {
        command: command.to_string(),
        stderr: stderr.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_not_found_patterns() {
        assert!(matches!(
            classify("vgs", "Volume group \"testvg\" not found"),
            LvmError::VgNotFound(_)
        ));
        assert!(matches!(
            classify("pvs", "Failed to find device \"/dev/sdz\""),
            LvmError::PvNotFound(_)
        ));
        assert!(matches!(
            classify("lvs", "Failed to find logical volume \"testvg/v1\""),
            LvmError::LvNotFound(_)
        ));
    }

    #[test]
    fn classifies_invalid_name() {
        assert!(matches!(
            classify("lvcreate", "Name contains invalid character, valid set is..."),
            LvmError::InvalidName(_)
        ));
    }

    #[test]
    fn classifies_no_space() {
        assert!(matches!(
            classify("lvcreate", "Insufficient free extents (10) in volume group"),
            LvmError::NoSpace
        ));
    }

    #[test]
    fn falls_back_to_transient() {
        assert!(matches!(
            classify("vgremove", "device-mapper: remove ioctl failed"),
            LvmError::Transient { .. }
        ));
    }
}
