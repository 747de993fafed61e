fn main() {
    let updates = tonic_build::manual::Method::builder()
        .name("updates")
        .route_name("Updates")
        .input_type("crate::rpc::UpdatesIn")
        .output_type("crate::rpc::UpdatesOut")
        .codec_path("tonic::codec::ProstCodec")
        .build();

    let service = tonic_build::manual::Service::builder()
        .name("MetricService")
        .package("metrics")
        .method(updates)
        .build();

    tonic_build::manual::Builder::new().compile(&[service]);
}
