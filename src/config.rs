//! CLI configuration for the plugin process: the volume group it manages,
//! its candidate devices, default filesystem, required tags, admission
//! limit, and listening socket.

use clap::Parser;

#[derive(Parser, Debug)]
#[clap(name = "lvm-csi-plugin", about = "A CSI plugin backed by LVM2")]
pub struct Cli {
    /// VG this instance manages.
    #[clap(long)]
    pub volume_group: String,

    /// Comma-separated candidate PV paths.
    #[clap(long, value_delimiter = ',')]
    pub devices: Vec<String>,

    /// Default filesystem name for new LVs.
    #[clap(long, default_value = "xfs")]
    pub default_fs: String,

    /// Default bytes if CreateVolume omits a capacity range.
    #[clap(long, default_value_t = 10 * 1024 * 1024 * 1024)]
    pub default_volume_size: u64,

    /// Start in REMOVING mode.
    #[clap(long)]
    pub remove_volume_group: bool,

    /// Tags required on the VG. May be repeated.
    #[clap(long = "tag")]
    pub tags: Vec<String>,

    /// Maximum number of RPCs admitted concurrently; arrivals over the
    /// limit are rejected immediately rather than queued.
    #[clap(long, default_value_t = 10)]
    pub request_limit: usize,

    /// Kernel modules Probe requires to be loaded. May be repeated.
    #[clap(long = "probe-module")]
    pub probe_modules: Vec<String>,

    /// Reported by GetNodeID; must be at most 128 octets.
    #[clap(long)]
    pub node_id: String,

    /// Literal path for the listening Unix socket.
    #[clap(long, group = "socket", conflicts_with = "unix_addr_env")]
    pub unix_addr: Option<String>,

    /// Environment variable holding the listening Unix socket path.
    #[clap(long, group = "socket")]
    pub unix_addr_env: Option<String>,

    /// Path to the advisory lock file serializing external LVM CLI access.
    #[clap(long, default_value = "/run/lvm-csi-plugin/lvm.lock")]
    pub lock_path: String,
}

impl Cli {
    /// Resolve the configured socket path from either `--unix-addr` or the
    /// environment variable named by `--unix-addr-env`.
    pub fn resolve_socket_path(&self) -> Result<String, String> {
        if let Some(path) = &self.unix_addr {
            return Ok(path.clone());
        }

        if let Some(var) = &self.unix_addr_env {
            return std::env::var(var).map_err(|err| format!("could not read ${var}: {err}"));
        }

        Err("one of --unix-addr or --unix-addr-env is required".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn resolve_socket_path_prefers_literal() {
        let cli = Cli {
            volume_group: "vg0".into(),
            devices: vec![],
            default_fs: "xfs".into(),
            default_volume_size: 0,
            remove_volume_group: false,
            tags: vec![],
            request_limit: 1,
            probe_modules: vec![],
            node_id: "node-a".into(),
            unix_addr: Some("/run/lvm-csi-plugin.sock".into()),
            unix_addr_env: None,
            lock_path: "/run/lvm-csi-plugin/lvm.lock".into(),
        };

        assert_eq!(cli.resolve_socket_path().unwrap(), "/run/lvm-csi-plugin.sock");
    }

    #[test]
    fn resolve_socket_path_requires_one_option() {
        let cli = Cli {
            volume_group: "vg0".into(),
            devices: vec![],
            default_fs: "xfs".into(),
            default_volume_size: 0,
            remove_volume_group: false,
            tags: vec![],
            request_limit: 1,
            probe_modules: vec![],
            node_id: "node-a".into(),
            unix_addr: None,
            unix_addr_env: None,
            lock_path: "/run/lvm-csi-plugin/lvm.lock".into(),
        };

        assert!(cli.resolve_socket_path().is_err());
    }
}
