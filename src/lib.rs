pub mod config;
pub mod controller;
pub mod error;
pub mod gate;
pub mod identity;
pub mod lvm;
pub mod mount;
pub mod names;
pub mod node;
pub mod probe;
pub mod state;
pub mod util;
pub mod vg;

pub mod csi {
    pub mod v1 {
        tonic::include_proto!("csi.v1");
    }
}
