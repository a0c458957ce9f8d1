//! Concrete adapter implementations for ports.

pub mod file_config_adapter;
pub mod line_source;
#[cfg(feature = "postgres")]
pub mod postgres_adapter;
pub mod sqlite_adapter;
