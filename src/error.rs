//! Plugin-wide error taxonomy and its mapping onto gRPC status codes.
//! Every error kind below is surfaced as an explicit, typed response;
//! the server never terminates the connection on a business error.

use thiserror::Error;
use tonic::Status;

use crate::lvm::LvmError;
use crate::mount::MountError;
use crate::names::NameError;
use crate::probe::ProbeError;
use crate::vg::ReconcileError;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("bad plugin configuration: {0}")]
    BadPluginConfig(String),
    #[error(transparent)]
    InvalidName(#[from] NameError),
    #[error("A logical volume with that name already exists.")]
    VolumeAlreadyExists,
    #[error("volume does not exist")]
    VolumeDoesNotExist,
    #[error("Not enough free space.")]
    UnsupportedCapacityRange,
    #[error("not enough free extents in volume group")]
    NoSpace,
    #[error("requested mirror count exceeds the number of available physical volumes")]
    TooFewDisks,
    #[error("unsupported filesystem: {0}")]
    UnsupportedFs(String),
    #[error("unsupported access mode for this access type")]
    UnsupportedAccessMode,
    #[error("mount error: {0}")]
    Mount(String),
    #[error("unmount error: {0}")]
    Unmount(String),
    #[error("format error: {0}")]
    Format(String),
    #[error("call not implemented")]
    CallNotImplemented,
    #[error("missing required field: {0}")]
    MissingRequiredField(String),
    #[error("unsupported version")]
    UnsupportedVersion,
    #[error("admission backlog exceeded")]
    BacklogExceeded,
    #[error("instance is in removing mode")]
    RemovingMode,
    #[error(transparent)]
    Lvm(#[from] LvmError),
}

impl From<ReconcileError> for PluginError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::BadConfig(msg) => PluginError::BadPluginConfig(msg),
            ReconcileError::Lvm(err) => PluginError::Lvm(err),
            ReconcileError::Name(err) => PluginError::InvalidName(err),
        }
    }
}

impl From<ProbeError> for PluginError {
    fn from(err: ProbeError) -> Self {
        match err {
            ProbeError::BadPluginConfig(msg) => PluginError::BadPluginConfig(msg),
        }
    }
}

impl From<MountError> for PluginError {
    fn from(err: MountError) -> Self {
        match err {
            MountError::UnsupportedFs(fs) => PluginError::UnsupportedFs(fs),
            MountError::Format { .. } => PluginError::Format(err.to_string()),
            MountError::Mount(_) | MountError::Busy(_) | MountError::AlreadyMounted(_) => {
                PluginError::Mount(err.to_string())
            }
            MountError::Unmount(_) => PluginError::Unmount(err.to_string()),
        }
    }
}

impl From<PluginError> for Status {
    fn from(err: PluginError) -> Self {
        match &err {
            PluginError::BadPluginConfig(_) => Status::failed_precondition(err.to_string()),
            PluginError::InvalidName(_) => Status::invalid_argument(err.to_string()),
            PluginError::VolumeAlreadyExists => Status::already_exists(err.to_string()),
            PluginError::VolumeDoesNotExist => Status::not_found(err.to_string()),
            PluginError::UnsupportedCapacityRange => Status::out_of_range(err.to_string()),
            PluginError::NoSpace => Status::resource_exhausted(err.to_string()),
            PluginError::TooFewDisks => Status::failed_precondition(err.to_string()),
            PluginError::UnsupportedFs(_) => Status::failed_precondition(err.to_string()),
            PluginError::UnsupportedAccessMode => Status::invalid_argument(err.to_string()),
            PluginError::Mount(_) => Status::internal(err.to_string()),
            PluginError::Unmount(_) => Status::internal(err.to_string()),
            PluginError::Format(_) => Status::internal(err.to_string()),
            PluginError::CallNotImplemented => Status::unimplemented(err.to_string()),
            PluginError::MissingRequiredField(_) => Status::invalid_argument(err.to_string()),
            PluginError::UnsupportedVersion => Status::invalid_argument(err.to_string()),
            PluginError::BacklogExceeded => Status::resource_exhausted(err.to_string()),
            PluginError::RemovingMode => Status::failed_precondition(err.to_string()),
            PluginError::Lvm(lvm_err) => lvm_status(lvm_err),
        }
    }
}

fn lvm_status(err: &LvmError) -> Status {
    match err {
        LvmError::VgNotFound(_) | LvmError::PvNotFound(_) | LvmError::LvNotFound(_) => {
            Status::not_found(err.to_string())
        }
        LvmError::InvalidName(_) => Status::invalid_argument(err.to_string()),
        LvmError::NoSpace => Status::resource_exhausted(err.to_string()),
        LvmError::TooFewDisks => Status::failed_precondition(err.to_string()),
        _ => Status::internal(err.to_string()),
    }
}
