fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    // Generate the CSI message/service bindings used by the identity,
    // controller and node gRPC surfaces.
    tonic_build::compile_protos("proto/csi.proto")?;

    Ok(())
}
