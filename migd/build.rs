fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::env::set_var("PROTOC", protobuf_src::protoc());
    tonic_build::configure()
        .build_client(false)
        .compile_protos(&["proto/mig/v0_1/mig.proto"], &["proto"])?;
    Ok(())
}
