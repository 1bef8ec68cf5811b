//! gRPC adapter — generated protobuf types plus the service
//! implementation and conversion helpers.

pub mod map;
pub mod service;

pub mod proto {
    tonic::include_proto!("chrysedge.agent");
}

pub use proto::edge_video_server::{EdgeVideo, EdgeVideoServer};
pub use service::EdgeVideoService;
