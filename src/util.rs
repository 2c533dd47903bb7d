//! Small helper for running a blocking LVM/mount call off the async
//! runtime's worker threads, so a slow `lvcreate` doesn't stall every other
//! in-flight RPC's polling.

use tonic::Status;

pub async fn blocking<F, T>(f: F) -> Result<T, Status>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| Status::internal(format!("worker task panicked: {err}")))
}
