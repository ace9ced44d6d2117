//! Concrete adapter implementations for ports.

pub mod file_config_adapter;
pub mod memory_adapter;
pub mod process_sandbox;
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub mod row_codec;

#[cfg(feature = "postgres")]
pub mod postgres_adapter;
#[cfg(feature = "sqlite")]
pub mod sqlite_adapter;
