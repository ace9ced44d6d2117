//! Code-execution sandbox port trait.

use crate::domain::error::EngineError;
use crate::domain::sandbox::{SandboxRequest, SandboxResponse};

/// Executes user-authored indicator code against assembled records.
///
/// Each call is synchronous and stateless. `Ok(SandboxResponse::Failure)` is a
/// failure reported by the code itself; `Err` means the sandbox could not be
/// reached or answered with something unreadable.
pub trait Sandbox {
    fn execute(&self, request: &SandboxRequest) -> Result<SandboxResponse, EngineError>;
}
