//! Isolated execution of site-authored bootstrap scripts.
//!
//! Every script runs in a fresh boa [`Context`] inside a short-lived child
//! process: the same executable started with the hidden
//! [`ENGINE_SUBCOMMAND`]. The script goes in on stdin and one
//! [`EngineReply`] comes back on stdout. On timeout the child is killed and
//! reaped, so a runaway script never outlives its page.
//!
//! The only binding added on top of the ECMAScript builtins is an empty
//! `window` object; there is no console, timer, module loader, file or
//! network access. After the script runs, `window` is serialized with the
//! engine's own `JSON.stringify`.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use boa_engine::object::ObjectInitializer;
use boa_engine::property::Attribute;
use boa_engine::vm::RuntimeLimits;
use boa_engine::{Context, JsString, Source};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::ScrapeConfig;
use crate::error::ScrapeError;

/// Subcommand under which the binary hosts the engine.
pub const ENGINE_SUBCOMMAND: &str = "sandbox-engine";

const GLOBAL_NAME: &str = "window";
const SERIALIZE_SNIPPET: &str = "JSON.stringify(window)";
const ENGINE_STACK_BYTES: usize = 16 * 1024 * 1024;

/// Runtime limits applied inside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineLimits {
    pub loop_iteration_limit: u64,
    pub recursion_limit: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            loop_iteration_limit: 50_000_000,
            recursion_limit: 512,
        }
    }
}

/// What the engine process writes to stdout.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EngineReply {
    State { window: Value },
    ExecutionFailed { message: String },
    SerializationFailed { message: String },
}

impl From<Result<Value, ScrapeError>> for EngineReply {
    fn from(res: Result<Value, ScrapeError>) -> Self {
        match res {
            Ok(window) => EngineReply::State { window },
            Err(ScrapeError::Serialization(message)) => EngineReply::SerializationFailed { message },
            Err(ScrapeError::SandboxExecution(message)) => EngineReply::ExecutionFailed { message },
            Err(e) => EngineReply::ExecutionFailed {
                message: e.to_string(),
            },
        }
    }
}

impl EngineReply {
    fn into_result(self) -> Result<Value, ScrapeError> {
        match self {
            EngineReply::State { window } => Ok(window),
            EngineReply::ExecutionFailed { message } => Err(ScrapeError::SandboxExecution(message)),
            EngineReply::SerializationFailed { message } => Err(ScrapeError::Serialization(message)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Sandbox {
    program: PathBuf,
    timeout: Duration,
    limits: EngineLimits,
}

impl Sandbox {
    /// `program` must understand [`ENGINE_SUBCOMMAND`]; normally that is
    /// the `adclaw` binary itself.
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
            limits: EngineLimits::default(),
        }
    }

    pub fn from_config(config: &ScrapeConfig) -> Result<Self, ScrapeError> {
        let program = match &config.sandbox_program {
            Some(p) => p.clone(),
            None => std::env::current_exe()
                .map_err(|e| ScrapeError::Config(format!("locate sandbox program: {e}")))?,
        };
        Ok(Self {
            program,
            timeout: config.sandbox_timeout(),
            limits: EngineLimits {
                loop_iteration_limit: config.loop_iteration_limit,
                recursion_limit: config.recursion_limit,
            },
        })
    }

    pub fn with_loop_iteration_limit(mut self, limit: u64) -> Self {
        self.limits.loop_iteration_limit = limit;
        self
    }

    /// Runs `script` in a fresh engine process and returns the resulting
    /// `window` object. The process is gone when this returns, whatever
    /// the outcome; dropping the future kills it too.
    pub async fn execute(&self, script: &str) -> Result<Value, ScrapeError> {
        let mut child = Command::new(&self.program)
            .arg(ENGINE_SUBCOMMAND)
            .arg("--loop-iteration-limit")
            .arg(self.limits.loop_iteration_limit.to_string())
            .arg("--recursion-limit")
            .arg(self.limits.recursion_limit.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ScrapeError::SandboxExecution(format!("spawn {}: {e}", self.program.display()))
            })?;

        let (Some(mut stdin), Some(mut stdout), Some(mut stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(ScrapeError::SandboxExecution("engine pipes missing".into()));
        };

        let feed = async move {
            match stdin.write_all(script.as_bytes()).await {
                // An engine that died early is reported through its exit status.
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
                res => res,
            }
        };
        let mut out = Vec::new();
        let mut err = Vec::new();
        let exchange = async {
            tokio::try_join!(
                feed,
                stdout.read_to_end(&mut out),
                stderr.read_to_end(&mut err),
                child.wait(),
            )
        };

        let status = match timeout(self.timeout, exchange).await {
            Ok(Ok((_, _, _, status))) => status,
            Ok(Err(e)) => {
                reap(&mut child).await;
                return Err(ScrapeError::SandboxExecution(format!("engine i/o: {e}")));
            }
            Err(_) => {
                reap(&mut child).await;
                return Err(ScrapeError::SandboxExecution(format!(
                    "timed out after {} ms",
                    self.timeout.as_millis()
                )));
            }
        };
        debug!(%status, len = out.len(), "sandbox engine finished");

        match serde_json::from_slice::<EngineReply>(&out) {
            Ok(reply) if status.success() => reply.into_result(),
            _ => Err(ScrapeError::SandboxExecution(format!(
                "engine exited with {status}: {}",
                String::from_utf8_lossy(&err).trim()
            ))),
        }
    }
}

async fn reap(child: &mut tokio::process::Child) {
    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to kill sandbox engine");
    }
}

/// Engine side of the exchange: reads a script from stdin, runs it and
/// writes one [`EngineReply`] to stdout.
pub fn serve_engine(limits: EngineLimits) -> Result<(), ScrapeError> {
    let mut script = String::new();
    io::stdin()
        .read_to_string(&mut script)
        .map_err(|e| ScrapeError::SandboxExecution(format!("read script: {e}")))?;

    let reply: EngineReply = std::thread::Builder::new()
        .name("js-sandbox".into())
        .stack_size(ENGINE_STACK_BYTES)
        .spawn(move || evaluate(&script, limits))
        .map_err(|e| ScrapeError::SandboxExecution(format!("spawn engine thread: {e}")))?
        .join()
        .map_err(|_| ScrapeError::SandboxExecution("engine thread panicked".into()))?
        .into();

    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, &reply)
        .map_err(|e| ScrapeError::SandboxExecution(format!("write reply: {e}")))?;
    stdout
        .flush()
        .map_err(|e| ScrapeError::SandboxExecution(format!("write reply: {e}")))
}

/// Runs `script` in a fresh context of the current thread.
pub fn evaluate(script: &str, limits: EngineLimits) -> Result<Value, ScrapeError> {
    let mut context = Context::default();
    let mut runtime = RuntimeLimits::default();
    runtime.set_loop_iteration_limit(limits.loop_iteration_limit);
    runtime.set_recursion_limit(limits.recursion_limit);
    context.set_runtime_limits(runtime);

    let window = ObjectInitializer::new(&mut context).build();
    context
        .register_global_property(JsString::from(GLOBAL_NAME), window, Attribute::all())
        .map_err(|e| ScrapeError::SandboxExecution(format!("seed window: {e}")))?;

    context
        .eval(Source::from_bytes(script))
        .map_err(|e| ScrapeError::SandboxExecution(e.to_string()))?;

    let serialized = context
        .eval(Source::from_bytes(SERIALIZE_SNIPPET))
        .map_err(|e| ScrapeError::Serialization(e.to_string()))?;

    let json = serialized
        .as_string()
        .map(|s| s.to_std_string_escaped())
        .ok_or_else(|| {
            ScrapeError::Serialization(format!(
                "{GLOBAL_NAME} serialized to {}",
                serialized.type_of()
            ))
        })?;

    serde_json::from_str(&json).map_err(|e| ScrapeError::Serialization(e.to_string()))
}
