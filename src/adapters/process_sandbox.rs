//! Sandbox adapter that runs user code in a child process.
//!
//! The request is written to the child's stdin as one JSON document and the
//! response is read from its stdout. The child owns the execution semantics
//! (helper library, time limits, isolation); this adapter only moves bytes.

use crate::domain::error::EngineError;
use crate::domain::sandbox::{SandboxRequest, SandboxResponse};
use crate::ports::config_port::ConfigPort;
use crate::ports::sandbox_port::Sandbox;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::debug;

const STDERR_TAIL: usize = 2000;

#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl ProcessSandbox {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, EngineError> {
        let program = config
            .get_string("sandbox", "command")
            .ok_or_else(|| EngineError::ConfigMissing {
                section: "sandbox".into(),
                key: "command".into(),
            })?;
        let args = config.get_list("sandbox", "args");

        let mut sandbox = Self::new(program, args);
        if let Some(dir) = config.get_string("sandbox", "working_dir") {
            sandbox = sandbox.with_working_dir(dir);
        }
        Ok(sandbox)
    }
}

fn tail(text: &str) -> &str {
    let text = text.trim();
    if text.len() <= STDERR_TAIL {
        return text;
    }
    let mut start = text.len() - STDERR_TAIL;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

impl Sandbox for ProcessSandbox {
    fn execute(&self, request: &SandboxRequest) -> Result<SandboxResponse, EngineError> {
        let payload = serde_json::to_vec(request).map_err(|e| EngineError::Sandbox {
            reason: format!("cannot encode request: {e}"),
        })?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| EngineError::Sandbox {
            reason: format!("cannot start {}: {e}", self.program),
        })?;
        debug!(program = %self.program, bytes = payload.len(), "sandbox started");

        // Feed stdin from its own thread so a child that writes before it has
        // read everything cannot fill the stdout pipe and stall both sides.
        let stdin = child.stdin.take();
        let output = std::thread::scope(|scope| {
            if let Some(mut stdin) = stdin {
                let payload = &payload;
                scope.spawn(move || {
                    // A child that exits without reading closes the pipe; its
                    // output still decides the outcome.
                    if let Err(e) = stdin.write_all(payload) {
                        debug!("sandbox stdin closed early: {e}");
                    }
                });
            }
            child.wait_with_output()
        })
        .map_err(|e| EngineError::Sandbox {
            reason: format!("sandbox did not finish: {e}"),
        })?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!(status = %output.status, bytes = output.stdout.len(), "sandbox finished");

        match SandboxResponse::from_json(&stdout) {
            Ok(response) => Ok(response),
            Err(e) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(EngineError::Sandbox {
                    reason: format!("{e} (exit status {}): {}", output.status, tail(&stderr)),
                })
            }
        }
    }
}
