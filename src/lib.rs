pub mod types;
pub mod encoding;
pub mod error;
pub mod source;
pub mod queue;
pub mod partitioner;
pub mod worker;
pub mod submit;
pub mod miner;
#[cfg(feature="opencl")]
pub mod cl_kernels;
#[cfg(feature="opencl")]
pub mod gpu;
#[cfg(feature="cpu-fallback")]
pub mod cpu;
pub mod getwork;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod prometheus_metrics;
pub mod report;
pub mod health;
pub mod server;
