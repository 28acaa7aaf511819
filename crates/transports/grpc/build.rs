// Build script for mediagraph-grpc
// Generates the MediaGraphExtension service and message types

fn main() {
    // Use vendored protoc from protobuf-src
    std::env::set_var("PROTOC", protobuf_src::protoc());

    compile_protos();

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=protos/");
}

/// Compile protocol buffers into OUT_DIR
fn compile_protos() {
    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true) // Client is used by the end-to-end tests
        .compile_protos(&["protos/mediagraph.proto"], &["protos/"])
        .unwrap_or_else(|e| panic!("Failed to compile protos: {}", e));
}
