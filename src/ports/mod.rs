//! Port traits the engine depends on; implemented in [`crate::adapters`].

pub mod config_port;
pub mod sandbox_port;
pub mod store_port;
