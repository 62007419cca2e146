// src/monitor/mod.rs
mod heartbeat;

pub use heartbeat::{HeartbeatError, HeartbeatMonitor, MonitorHandle, MonitorSettings};
