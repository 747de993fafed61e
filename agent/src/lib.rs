//! Pulse agent
//!
//! Samples host and process statistics on a fixed cadence and forwards them
//! to the collector over HTTP or gRPC.

pub mod client;
pub mod config;
pub mod limiter;
pub mod scheduler;
pub mod stats;

pub use client::{build_transport, Transport, TransportError};
pub use config::{AgentArgs, AgentConfig, TransportKind};
pub use limiter::RateLimiter;
pub use scheduler::{Scheduler, SchedulerHandle};
pub use stats::{StatsCollector, StatsSource};
