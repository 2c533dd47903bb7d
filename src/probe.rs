//! Probe: liveness check re-running the startup reconciliation read-only,
//! plus the optional kernel-module presence check (`--probe-module`).

use std::fs;

use thiserror::Error;

use crate::lvm::LvmDriver;
use crate::vg::VgManager;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("bad plugin configuration: {0}")]
    BadPluginConfig(String),
}

/// Required kernel modules, checked against `/proc/modules`.
pub fn check_kernel_modules(required: &[String]) -> Result<(), ProbeError> {
    if required.is_empty() {
        return Ok(());
    }

    let loaded = fs::read_to_string("/proc/modules").unwrap_or_default();
    let missing: Vec<&str> = required
        .iter()
        .map(String::as_str)
        .filter(|module| !loaded.lines().any(|line| line.split_whitespace().next() == Some(*module)))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ProbeError::BadPluginConfig(format!("required kernel modules not loaded: {missing:?}")))
    }
}

pub fn run(vg: &VgManager, lvm: &LvmDriver, required_modules: &[String]) -> Result<(), ProbeError> {
    vg.probe(lvm).map_err(|err| ProbeError::BadPluginConfig(err.to_string()))?;
    check_kernel_modules(required_modules)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_module_list_is_always_satisfied() {
        assert!(check_kernel_modules(&[]).is_ok());
    }

    #[test]
    fn missing_module_is_reported_by_name() {
        let err = check_kernel_modules(&["definitely_not_a_real_module".to_string()]).unwrap_err();
        assert!(err.to_string().contains("definitely_not_a_real_module"));
    }
}
