//! Volume controller: CreateVolume, DeleteVolume,
//! ValidateVolumeCapabilities, ListVolumes, GetCapacity and
//! ControllerGetCapabilities.
//!
//! Calls into the LVM driver and name validator in-process, behind the
//! request gate's admission and serialization guarantees.

use std::collections::HashMap;
use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::csi::v1::{
    controller_server::{Controller, ControllerServer},
    controller_service_capability, list_volumes_response::Entry as VolumeEntry,
    validate_volume_capabilities_response::Confirmed,
    volume_capability::AccessType,
    ControllerGetCapabilitiesRequest, ControllerGetCapabilitiesResponse, ControllerPublishVolumeRequest,
    ControllerPublishVolumeResponse, ControllerServiceCapability, ControllerUnpublishVolumeRequest,
    ControllerUnpublishVolumeResponse, CreateVolumeRequest, CreateVolumeResponse, DeleteVolumeRequest,
    DeleteVolumeResponse, GetCapacityRequest, GetCapacityResponse, ListVolumesRequest, ListVolumesResponse,
    ValidateVolumeCapabilitiesRequest, ValidateVolumeCapabilitiesResponse, Volume, VolumeCapability,
};
use crate::error::PluginError;
use crate::gate::{require_field, require_non_empty, require_supported_version};
use crate::lvm::{Layout, LogicalVolumeInfo};
use crate::mount;
use crate::names::{lv_disk_name, strip_vg_prefix, LvmName};
use crate::state::AppState;
use crate::util::blocking;
use crate::vg::LifecycleState;

macro_rules! controller_capability {
    ( $capability:ident ) => {
        ControllerServiceCapability {
            r#type: Some(controller_service_capability::Type::Rpc(controller_service_capability::Rpc {
                r#type: controller_service_capability::rpc::Type::$capability as i32,
            })),
        }
    };
}

pub struct VolumeController {
    state: Arc<AppState>,
}

impl VolumeController {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub fn into_service(self) -> ControllerServer<Self> {
        ControllerServer::new(self)
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

    fn process_volume(&self, lv: &LogicalVolumeInfo) -> Volume {
        Volume {
            capacity_bytes: lv.size_bytes as i64,
            volume_id: lv.name.clone(),
            volume_context: HashMap::from([(
                "name".to_string(),
                strip_vg_prefix(&self.state.vg.vg, &lv.name).unwrap_or(&lv.name).to_string(),
            )]),
            content_source: None,
            accessible_topology: vec![],
        }
    }
}

fn parse_layout(parameters: &HashMap<String, String>) -> Result<(Layout, Vec<String>), Status> {
    let pvs: Vec<String> = parameters
        .get("pvs")
        .map(|s| s.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();

    let layout = match parameters.get("type").map(String::as_str) {
        None | Some("linear") => Layout::Linear,
        Some("raid1") => {
            let mirrors: u32 = match parameters.get("mirrors") {
                Some(raw) => raw
                    .parse()
                    .map_err(|_| Status::invalid_argument("`mirrors` must be a positive integer"))?,
                None => 1,
            };
            Layout::Raid1 { mirrors }
        }
        Some(other) => return Err(Status::invalid_argument(format!("unknown volume `type`: {other}"))),
    };

    Ok((layout, pvs))
}

/// Validate that every requested capability is servable, returning the
/// filesystem name to format with if any capability requests a mount.
fn resolve_requested_fs(capabilities: &[VolumeCapability], default_fs: &str, supported: &[String]) -> Result<Option<String>, Status> {
    let mut requested_fs = None;

    for cap in capabilities {
        match &cap.access_type {
            Some(AccessType::Mount(mount_cap)) => {
                let fs_name = if mount_cap.fs_type.is_empty() { default_fs } else { &mount_cap.fs_type };
                if !supported.iter().any(|fs| fs == fs_name) {
                    return Err(PluginError::UnsupportedFs(fs_name.to_string()).into());
                }
                requested_fs = Some(fs_name.to_string());
            }
            Some(AccessType::Block(_)) => {}
            None => return Err(Status::invalid_argument("volume capability missing access_type")),
        }
    }

    Ok(requested_fs)
}

#[tonic::async_trait]
impl Controller for VolumeController {
    async fn create_volume(
        &self,
        request: Request<CreateVolumeRequest>,
    ) -> Result<Response<CreateVolumeResponse>, Status> {
        let _permit = self.state.gate.admit()?;
        let req = request.into_inner();

        log::info!("got CreateVolume request: name={}", req.name);

        require_field(&req.name, "name")?;
        require_non_empty(&req.volume_capabilities, "volume_capabilities")?;
        require_supported_version(&req.version)?;
        self.check_active()?;

        let (layout, pv_allowlist) = parse_layout(&req.parameters)?;
        let requested_fs = resolve_requested_fs(&req.volume_capabilities, &self.state.default_fs, &self.state.supported_filesystems)?;

        let vg_name: LvmName = self.state.vg.vg.clone();
        let disk_name = LvmName::try_from(lv_disk_name(&vg_name, &req.name)).map_err(PluginError::from)?;

        let size_bytes = match req.capacity_range {
            Some(range) if range.required_bytes > 0 => range.required_bytes as u64,
            _ => self.state.default_volume_size,
        };

        let _guard = self.state.gate.serialize().await;
        let lvm = Arc::clone(&self.state.lvm);

        if blocking({
            let lvm = Arc::clone(&lvm);
            let disk_name = disk_name.clone();
            let vg_name = vg_name.clone();
            move || lvm.lookup_lv(&vg_name, disk_name.as_str())
        })
        .await?
        .map_err(PluginError::from)?
        .is_some()
        {
            return Err(PluginError::VolumeAlreadyExists.into());
        }

        let vg_info = blocking({
            let lvm = Arc::clone(&lvm);
            let vg_name = vg_name.clone();
            move || lvm.lookup_vg(&vg_name)
        })
        .await?
        .map_err(PluginError::from)?
        .ok_or_else(|| Status::from(PluginError::BadPluginConfig("volume group disappeared".into())))?;

        let effective_needed = size_bytes.saturating_mul(layout.copies());
        if effective_needed > vg_info.total_bytes {
            return Err(PluginError::UnsupportedCapacityRange.into());
        }

        let vg_pv_count = vg_info.pvs.len();
        let lv = blocking({
            let lvm = Arc::clone(&lvm);
            let vg_name = vg_name.clone();
            let disk_name = disk_name.clone();
            move || {
                lvm.lv_create(
                    &vg_name,
                    disk_name.as_str(),
                    size_bytes,
                    &[],
                    layout,
                    &pv_allowlist,
                    vg_info.free_extent_count,
                    vg_info.extent_size,
                    vg_pv_count,
                )
            }
        })
        .await?
        .map_err(PluginError::from)?;

        if requested_fs.is_some() {
            log::debug!("deferring format of {} to the first NodePublish", lv.path);
        }

        Ok(Response::new(CreateVolumeResponse {
            volume: Some(self.process_volume(&lv)),
        }))
    }

    async fn delete_volume(
        &self,
        request: Request<DeleteVolumeRequest>,
    ) -> Result<Response<DeleteVolumeResponse>, Status> {
        let _permit = self.state.gate.admit()?;
        let req = request.into_inner();

        require_field(&req.volume_id, "volume_id")?;
        require_supported_version(&req.version)?;
        self.check_active()?;

        let _guard = self.state.gate.serialize().await;
        let lvm = Arc::clone(&self.state.lvm);
        let vg_name = self.state.vg.vg.clone();
        let disk_name = req.volume_id.clone();

        let found = blocking({
            let lvm = Arc::clone(&lvm);
            let vg_name = vg_name.clone();
            let disk_name = disk_name.clone();
            move || lvm.lookup_lv(&vg_name, &disk_name)
        })
        .await?
        .map_err(PluginError::from)?;

        if found.is_none() {
            return Err(PluginError::VolumeDoesNotExist.into());
        }

        blocking(move || lvm.lv_remove(&vg_name, &disk_name)).await?.map_err(PluginError::from)?;

        Ok(Response::new(DeleteVolumeResponse {}))
    }

    async fn validate_volume_capabilities(
        &self,
        request: Request<ValidateVolumeCapabilitiesRequest>,
    ) -> Result<Response<ValidateVolumeCapabilitiesResponse>, Status> {
        let _permit = self.state.gate.admit()?;
        let req = request.into_inner();

        require_field(&req.volume_id, "volume_id")?;
        require_non_empty(&req.volume_capabilities, "volume_capabilities")?;
        require_supported_version(&req.version)?;
        self.check_active()?;

        let _guard = self.state.gate.serialize().await;
        let lvm = Arc::clone(&self.state.lvm);
        let vg_name = self.state.vg.vg.clone();
        let disk_name = req.volume_id.clone();

        let lv = blocking({
            let disk_name = disk_name.clone();
            move || lvm.lookup_lv(&vg_name, &disk_name)
        })
        .await?
        .map_err(PluginError::from)?
        .ok_or(PluginError::VolumeDoesNotExist)?;

        let on_disk_fs = blocking(move || mount::detect_fs(&lv.path))
            .await?
            .map_err(PluginError::from)?;

        let mut mismatch = None;
        for cap in &req.volume_capabilities {
            if let Some(AccessType::Mount(mount_cap)) = &cap.access_type {
                if !mount_cap.fs_type.is_empty() {
                    if let Some(existing) = &on_disk_fs {
                        if existing != &mount_cap.fs_type {
                            mismatch = Some(format!(
                                "volume's existing filesystem {existing} does not match requested {}",
                                mount_cap.fs_type
                            ));
                        }
                    }
                }
            }
        }

        let reply = match mismatch {
            Some(message) => ValidateVolumeCapabilitiesResponse { confirmed: None, message },
            None => ValidateVolumeCapabilitiesResponse {
                confirmed: Some(Confirmed {
                    volume_context: HashMap::new(),
                    volume_capabilities: req.volume_capabilities,
                    parameters: req.parameters,
                }),
                message: String::new(),
            },
        };

        Ok(Response::new(reply))
    }

    async fn list_volumes(
        &self,
        request: Request<ListVolumesRequest>,
    ) -> Result<Response<ListVolumesResponse>, Status> {
        let _permit = self.state.gate.admit()?;
        let req = request.into_inner();
        require_supported_version(&req.version)?;
        self.check_active()?;

        let max_entries: usize = req
            .max_entries
            .try_into()
            .map_err(|_| Status::invalid_argument("`max_entries` must not be negative"))?;
        let start: usize = if req.starting_token.is_empty() {
            0
        } else {
            req.starting_token
                .parse()
                .map_err(|_| Status::aborted("`starting_token` is not a valid pagination cursor"))?
        };

        let _guard = self.state.gate.serialize().await;
        let lvm = Arc::clone(&self.state.lvm);
        let vg_name = self.state.vg.vg.clone();

        let lvs = blocking(move || lvm.list_lvs(&vg_name)).await?.map_err(PluginError::from)?;

        let total = lvs.len();
        let window: Vec<VolumeEntry> = lvs
            .into_iter()
            .skip(start)
            .take(if max_entries == 0 { usize::MAX } else { max_entries })
            .map(|lv| VolumeEntry {
                volume: Some(self.process_volume(&lv)),
                status: None,
            })
            .collect();

        let next_index = start + window.len();
        Ok(Response::new(ListVolumesResponse {
            entries: window,
            next_token: if next_index < total { next_index.to_string() } else { String::new() },
        }))
    }

    async fn get_capacity(
        &self,
        request: Request<GetCapacityRequest>,
    ) -> Result<Response<GetCapacityResponse>, Status> {
        let _permit = self.state.gate.admit()?;
        let req = request.into_inner();
        require_supported_version(&req.version)?;
        self.check_active()?;

        let (layout, _) = parse_layout(&req.parameters)?;

        let _guard = self.state.gate.serialize().await;
        let lvm = Arc::clone(&self.state.lvm);
        let vg_name = self.state.vg.vg.clone();

        let vg_info = blocking(move || lvm.lookup_vg(&vg_name))
            .await?
            .map_err(PluginError::from)?
            .ok_or_else(|| Status::from(PluginError::BadPluginConfig("volume group disappeared".into())))?;

        let available = (vg_info.free_extent_count / layout.copies()) * vg_info.extent_size;

        Ok(Response::new(GetCapacityResponse {
            available_capacity: available as i64,
            maximum_volume_size: Some(vg_info.total_bytes as i64),
            minimum_volume_size: Some(vg_info.extent_size as i64),
        }))
    }

    async fn controller_get_capabilities(
        &self,
        request: Request<ControllerGetCapabilitiesRequest>,
    ) -> Result<Response<ControllerGetCapabilitiesResponse>, Status> {
        require_supported_version(&request.into_inner().version)?;

        Ok(Response::new(ControllerGetCapabilitiesResponse {
            capabilities: vec![
                controller_capability!(CreateDeleteVolume),
                controller_capability!(ListVolumes),
                controller_capability!(GetCapacity),
            ],
        }))
    }

    async fn controller_publish_volume(
        &self,
        _request: Request<ControllerPublishVolumeRequest>,
    ) -> Result<Response<ControllerPublishVolumeResponse>, Status> {
        Err(PluginError::CallNotImplemented.into())
    }

    async fn controller_unpublish_volume(
        &self,
        _request: Request<ControllerUnpublishVolumeRequest>,
    ) -> Result<Response<ControllerUnpublishVolumeResponse>, Status> {
        Err(PluginError::CallNotImplemented.into())
    }
}
