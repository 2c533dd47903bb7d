//! Identity service: plugin metadata plus the liveness Probe RPC.
//!
//! Probe runs the real VG reconciliation checks in-process rather than
//! pinging a sibling daemon.

use std::collections::HashMap;
use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::csi::v1::{
    identity_server::{Identity, IdentityServer},
    plugin_capability, GetPluginCapabilitiesRequest, GetPluginCapabilitiesResponse, GetPluginInfoRequest,
    GetPluginInfoResponse, GetSupportedVersionsRequest, GetSupportedVersionsResponse, PluginCapability,
    ProbeRequest, ProbeResponse,
};
use crate::gate::CURRENT_VERSION;
use crate::state::AppState;
use crate::util::blocking;

const PLUGIN_NAME: &str = "io.github.lvm-csi-plugin";
const PLUGIN_VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct PluginIdentity {
    state: Arc<AppState>,
}

impl PluginIdentity {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub fn into_service(self) -> IdentityServer<Self> {
        IdentityServer::new(self)
    }
}

#[tonic::async_trait]
impl Identity for PluginIdentity {
    async fn get_supported_versions(
        &self,
        _request: Request<GetSupportedVersionsRequest>,
    ) -> Result<Response<GetSupportedVersionsResponse>, Status> {
        Ok(Response::new(GetSupportedVersionsResponse {
            supported_versions: vec![CURRENT_VERSION],
        }))
    }

    async fn get_plugin_info(
        &self,
        _request: Request<GetPluginInfoRequest>,
    ) -> Result<Response<GetPluginInfoResponse>, Status> {
        Ok(Response::new(GetPluginInfoResponse {
            name: PLUGIN_NAME.into(),
            vendor_version: PLUGIN_VERSION.into(),
            manifest: HashMap::new(),
        }))
    }

    async fn get_plugin_capabilities(
        &self,
        _request: Request<GetPluginCapabilitiesRequest>,
    ) -> Result<Response<GetPluginCapabilitiesResponse>, Status> {
        Ok(Response::new(GetPluginCapabilitiesResponse {
            capabilities: vec![PluginCapability {
                r#type: Some(plugin_capability::Type::Service(plugin_capability::Service {
                    r#type: plugin_capability::service::Type::ControllerService as i32,
                })),
            }],
        }))
    }

    async fn probe(&self, _request: Request<ProbeRequest>) -> Result<Response<ProbeResponse>, Status> {
        let vg = Arc::clone(&self.state.vg);
        let lvm = Arc::clone(&self.state.lvm);
        let modules = self.state.probe_modules.clone();

        let ready = blocking(move || crate::probe::run(&vg, &lvm, &modules).is_ok()).await?;

        Ok(Response::new(ProbeResponse { ready: Some(ready) }))
    }
}
