//! Process entry point: parse flags, reconcile the managed volume group,
//! then serve Identity/Controller/Node over a single Unix socket.
//!
//! Validates configuration and reconciles the volume group before the
//! socket is ever bound, so a bad flag or a mismatched VG fails loudly
//! at startup rather than surfacing on the first RPC.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use futures_util::FutureExt;
use tokio::net::UnixListener;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;

use lvm_csi_plugin::config::Cli;
use lvm_csi_plugin::controller::VolumeController;
use lvm_csi_plugin::identity::PluginIdentity;
use lvm_csi_plugin::lvm::LvmDriver;
use lvm_csi_plugin::names::{LvmName, Tag};
use lvm_csi_plugin::node::NodePublisher;
use lvm_csi_plugin::state::AppState;
use lvm_csi_plugin::vg::VgManager;

const MAX_NODE_ID_OCTETS: usize = 128;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Cli::parse();

    if args.node_id.len() > MAX_NODE_ID_OCTETS {
        return Err(format!("--node-id must be at most {MAX_NODE_ID_OCTETS} octets, got {}", args.node_id.len()).into());
    }
    if args.request_limit < 1 {
        return Err("--request-limit must be at least 1".into());
    }

    let vg_name = LvmName::try_from(args.volume_group.as_str()).map_err(|err| err.to_string())?;
    let tags = args
        .tags
        .iter()
        .map(|t| Tag::try_from(t.as_str()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| err.to_string())?;

    let socket_path = args.resolve_socket_path()?;

    log::info!("managing volume group `{vg_name}` on devices {:?}", args.devices);

    let lvm = LvmDriver::new(PathBuf::from(&args.lock_path));
    let vg = VgManager::new(vg_name, args.devices.clone(), tags);

    vg.reconcile(&lvm, args.remove_volume_group)
        .map_err(|err| format!("failed to reconcile volume group at startup: {err}"))?;

    log::info!(
        "volume group reconciled, starting in {} mode",
        if args.remove_volume_group { "removing" } else { "active" }
    );

    let state = Arc::new(AppState::new(
        vg,
        lvm,
        args.request_limit,
        args.default_fs.clone(),
        args.default_volume_size,
        args.node_id.clone(),
        args.probe_modules.clone(),
    ));

    let controller = VolumeController::new(Arc::clone(&state));
    let node = NodePublisher::new(Arc::clone(&state));
    let identity = PluginIdentity::new(Arc::clone(&state));

    let sock = UnixListener::bind(&socket_path)?;
    let sock_stream = UnixListenerStream::new(sock);

    log::info!("listening on unix socket `{socket_path}`");

    let (tx, mut rx) = tokio::sync::mpsc::channel(1);
    ctrlc::set_handler(move || tx.blocking_send(()).expect("could not send sigint"))
        .expect("could not set Ctrl-C handler");

    Server::builder()
        .add_service(identity.into_service())
        .add_service(controller.into_service())
        .add_service(node.into_service())
        .serve_with_incoming_shutdown(sock_stream, rx.recv().map(|_| ()))
        .await?;

    log::info!("cleaning up socket file...");
    tokio::fs::remove_file(&socket_path).await?;

    Ok(())
}
