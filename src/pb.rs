// Generated protobuf/gRPC types for the record.v1 surface.

pub mod record {
    pub mod v1 {
        tonic::include_proto!("record.v1");

        pub const FILE_DESCRIPTOR_SET: &[u8] =
            tonic::include_file_descriptor_set!("record_descriptor");
    }
}
