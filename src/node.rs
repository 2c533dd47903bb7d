//! Node publisher: NodePublishVolume / NodeUnpublishVolume,
//! access-type dispatch, first-use formatting, and GetNodeID/NodeGetCapabilities.
//!
//! This plugin never stages: there is no intermediate staging path, so
//! `NodeStageVolume`/`NodeUnstageVolume` have no counterpart here and are
//! not part of the `Node` surface this binary serves.

use std::collections::HashMap;
use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::csi::v1::{
    node_server::{Node, NodeServer},
    volume_capability::{access_mode::Mode, AccessType},
    NodeGetCapabilitiesRequest, NodeGetCapabilitiesResponse, NodeGetInfoRequest, NodeGetInfoResponse,
    NodePublishVolumeRequest, NodePublishVolumeResponse, NodeUnpublishVolumeRequest, NodeUnpublishVolumeResponse,
    Topology,
};
use crate::error::PluginError;
use crate::gate::{require_field, require_supported_version};
use crate::mount::{self, MountError};
use crate::state::AppState;
use crate::util::blocking;
use crate::vg::LifecycleState;

pub struct NodePublisher {
    state: Arc<AppState>,
}

impl NodePublisher {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub fn into_service(self) -> NodeServer<Self> {
        NodeServer::new(self)
    }

    fn check_active(&self) -> Result<(), Status> {
        match self.state.vg.state() {
            LifecycleState::Active => Ok(()),
            LifecycleState::Removing => Err(PluginError::RemovingMode.into()),
            LifecycleState::Uninitialized | LifecycleState::Failed => {
                Err(PluginError::BadPluginConfig("volume group is not active".into()).into())
            }
        }
    }
}

#[tonic::async_trait]
impl Node for NodePublisher {
    async fn node_publish_volume(
        &self,
        request: Request<NodePublishVolumeRequest>,
    ) -> Result<Response<NodePublishVolumeResponse>, Status> {
        let _permit = self.state.gate.admit()?;
        let req = request.into_inner();

        log::info!("got NodePublishVolume request: volume_id={} target={}", req.volume_id, req.target_path);

        require_field(&req.volume_id, "volume_id")?;
        require_field(&req.target_path, "target_path")?;
        require_supported_version(&req.version)?;
        self.check_active()?;

        let cap = req
            .volume_capability
            .ok_or_else(|| PluginError::MissingRequiredField("volume_capability".into()))?;
        let readonly = req.readonly
            || cap.access_mode.as_ref().map(|m| m.mode() == Mode::SingleNodeReaderOnly).unwrap_or(false);

        let _guard = self.state.gate.serialize().await;
        let lvm = Arc::clone(&self.state.lvm);
        let vg_name = self.state.vg.vg.clone();
        let disk_name = req.volume_id.clone();

        let lv = blocking(move || lvm.lookup_lv(&vg_name, &disk_name))
            .await?
            .map_err(PluginError::from)?
            .ok_or(PluginError::VolumeDoesNotExist)?;

        match cap.access_type {
            Some(AccessType::Block(_)) => {
                if readonly {
                    return Err(PluginError::UnsupportedAccessMode.into());
                }

                let target = req.target_path.clone();
                if !blocking({
                    let target = target.clone();
                    move || mount::target_exists_as_file(&target)
                })
                .await?
                {
                    return Err(Status::failed_precondition(format!(
                        "target path {target} must already exist as a regular file for a block publish"
                    )));
                }

                let device = lv.path.clone();
                blocking(move || mount::bind_mount_block(&device, &target))
                    .await?
                    .map_err(PluginError::from)?;
            }
            Some(AccessType::Mount(mount_cap)) => {
                let target = req.target_path.clone();
                if !blocking({
                    let target = target.clone();
                    move || mount::target_exists_as_dir(&target)
                })
                .await?
                {
                    return Err(Status::failed_precondition(format!("target path {target} must already exist as a directory")));
                }

                let device = lv.path.clone();
                let on_disk_fs = blocking({
                    let device = device.clone();
                    move || mount::detect_fs(&device)
                })
                .await?
                .map_err(PluginError::from)?;

                let requested_fs = if mount_cap.fs_type.is_empty() { None } else { Some(mount_cap.fs_type.clone()) };

                let fs_name = match (&on_disk_fs, &requested_fs) {
                    (None, requested) => {
                        let fs_name = requested.clone().unwrap_or_else(|| self.state.default_fs.clone());
                        blocking({
                            let device = device.clone();
                            let fs_name = fs_name.clone();
                            move || mount::format(&device, &fs_name)
                        })
                        .await?
                        .map_err(PluginError::from)?;
                        fs_name
                    }
                    (Some(existing), Some(requested)) if existing != requested => {
                        return Err(PluginError::Mount(
                            "The volume's existing filesystem does not match the one requested.".to_string(),
                        )
                        .into());
                    }
                    (Some(existing), _) => existing.clone(),
                };

                let options = mount_cap.mount_flags.clone();
                blocking(move || mount::mount_fs(&device, &target, &fs_name, readonly, &options))
                    .await?
                    .map_err(PluginError::from)?;
            }
            None => return Err(Status::invalid_argument("volume_capability missing access_type")),
        }

        Ok(Response::new(NodePublishVolumeResponse {}))
    }

    async fn node_unpublish_volume(
        &self,
        request: Request<NodeUnpublishVolumeRequest>,
    ) -> Result<Response<NodeUnpublishVolumeResponse>, Status> {
        let _permit = self.state.gate.admit()?;
        let req = request.into_inner();

        log::info!("got NodeUnpublishVolume request: volume_id={} target={}", req.volume_id, req.target_path);

        require_field(&req.volume_id, "volume_id")?;
        require_field(&req.target_path, "target_path")?;
        require_supported_version(&req.version)?;
        self.check_active()?;

        let _guard = self.state.gate.serialize().await;
        let lvm = Arc::clone(&self.state.lvm);
        let vg_name = self.state.vg.vg.clone();
        let disk_name = req.volume_id.clone();

        blocking(move || lvm.lookup_lv(&vg_name, &disk_name))
            .await?
            .map_err(PluginError::from)?
            .ok_or(PluginError::VolumeDoesNotExist)?;

        let target = req.target_path.clone();
        match blocking(move || mount::unmount(&target)).await? {
            Ok(()) => {}
            Err(MountError::Unmount(io_err)) if io_err.raw_os_error() == Some(libc_enoent()) => {
                // Already unmounted: treat as a successful no-op.
            }
            Err(other) => return Err(PluginError::from(other).into()),
        }

        Ok(Response::new(NodeUnpublishVolumeResponse {}))
    }

    async fn node_get_capabilities(
        &self,
        request: Request<NodeGetCapabilitiesRequest>,
    ) -> Result<Response<NodeGetCapabilitiesResponse>, Status> {
        require_supported_version(&request.into_inner().version)?;

        Ok(Response::new(NodeGetCapabilitiesResponse { capabilities: vec![] }))
    }

    async fn node_get_info(&self, request: Request<NodeGetInfoRequest>) -> Result<Response<NodeGetInfoResponse>, Status> {
        require_supported_version(&request.into_inner().version)?;

        Ok(Response::new(NodeGetInfoResponse {
            node_id: self.state.node_id.clone(),
            max_volumes_per_node: None,
            accessible_topology: Some(Topology { segments: HashMap::new() }),
        }))
    }
}

fn libc_enoent() -> i32 {
    2
}
