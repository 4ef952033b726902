fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::compile_protos("proto/hydrogen.proto")?;
    println!("cargo:rerun-if-changed=proto/hydrogen.proto");
    Ok(())
}
