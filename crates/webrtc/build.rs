fn main() {
    protobuf_codegen::Codegen::new()
        .protoc()
        .protoc_path(&protoc_bin_vendored::protoc_bin_path().unwrap())
        .include("src/proto")
        .input("src/proto/pb.proto")
        .cargo_out_dir("proto")
        .run_from_script();
}
