//! Concrete adapter implementations for ports.

pub mod csv_adapter;
pub mod file_config_adapter;
pub mod json_state_adapter;
pub mod paper_gateway;
#[cfg(feature = "sqlite")]
pub mod sqlite_state_adapter;
pub mod tracing_sink;
