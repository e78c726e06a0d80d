pub mod application;
pub mod config;
pub mod crawler;
pub mod domain;
pub mod engine;
pub mod error;
pub mod explorer;
pub mod grpc;
pub mod logging;
pub mod storage;
pub mod swap;

pub mod proto {
    pub mod v1 {
        tonic::include_proto!("liquid_lpd.v1");
    }
}
