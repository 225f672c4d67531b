//! Engine crate for the DNS authoritative-server load generator: payload
//! compilation, packet forging, raw-socket transmit/receive, rate-paced
//! worker threads, and the controller that sequences measurement runs.

pub mod controller;
pub mod counters;
pub mod error;
pub mod forge;
pub mod payload;
pub mod receiver_task;
pub mod rx;
pub mod sampler;
pub mod spoof;
pub mod timestamp;
pub mod tx;
pub mod worker;

pub use controller::{Controller, ProgressSink, ResultSink, RunConfig, RunResult};
pub use error::{ConfigError, ForgeError, PayloadError, SocketError};
pub use payload::PayloadStore;
pub use sampler::{SensorSnapshot, SystemSampler};
pub use spoof::SourceSpoof;
