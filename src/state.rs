//! Shared, process-wide state threaded through every gRPC service impl.

use std::sync::Arc;

use crate::gate::RequestGate;
use crate::lvm::LvmDriver;
use crate::mount;
use crate::vg::VgManager;

pub struct AppState {
    pub vg: Arc<VgManager>,
    pub lvm: Arc<LvmDriver>,
    pub gate: RequestGate,
    pub default_fs: String,
    pub default_volume_size: u64,
    pub supported_filesystems: Vec<String>,
    pub node_id: String,
    pub probe_modules: Vec<String>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        vg: VgManager,
        lvm: LvmDriver,
        request_limit: usize,
        default_fs: String,
        default_volume_size: u64,
        node_id: String,
        probe_modules: Vec<String>,
    ) -> Self {
        Self {
            vg: Arc::new(vg),
            lvm: Arc::new(lvm),
            gate: RequestGate::new(request_limit),
            default_fs,
            default_volume_size,
            supported_filesystems: mount::supported_filesystems(),
            node_id,
            probe_modules,
        }
    }
}
