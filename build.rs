fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Ensure a protoc binary is available even when one isn't installed
    // system-wide, using the vendored build dependency.
    if std::env::var_os("PROTOC").is_none() {
        if let Ok(path) = protoc_bin_vendored::protoc_bin_path() {
            std::env::set_var("PROTOC", path);
        }
    }
    tonic_build::configure().compile_protos(&["src/inference.proto"], &["src"])?;
    Ok(())
}
