use std::{
    ffi::OsString,
    process::Stdio,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    process::{Child, ChildStderr, ChildStdin, ChildStdout, Command},
    sync::Mutex as AsyncMutex,
};
use tracing::{debug, info, warn};

use crate::{core::error::RuntimeError, environment::EnvironmentService};

const BRIDGE_SOURCE: &str = include_str!("bridge.py");
const STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Only the [`RuntimeManager`](super::RuntimeManager) may call `initialize`
/// and `shutdown`. Implementations serialise `exec` and `call`.
#[async_trait]
pub trait InterpreterHost: Send + Sync {
    async fn initialize(&self) -> anyhow::Result<()>;

    async fn shutdown(&self);

    fn is_alive(&self) -> bool;

    async fn exec(&self, source: &str) -> Result<(), RuntimeError>;

    async fn call(&self, function: &str, args: Vec<Value>) -> Result<Value, RuntimeError>;
}

// A long-lived child process speaking JSON lines over stdin/stdout.
pub struct ProcessInterpreter {
    environment: Arc<EnvironmentService>,
    environment_name: String,
    shutdown_timeout: Duration,
    bridge: AsyncMutex<Option<Bridge>>,
    alive: AtomicBool,
}

impl ProcessInterpreter {
    pub fn new(
        environment: Arc<EnvironmentService>,
        environment_name: impl Into<String>,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            environment,
            environment_name: environment_name.into(),
            shutdown_timeout,
            bridge: AsyncMutex::new(None),
            alive: AtomicBool::new(false),
        }
    }

    fn search_path(&self) -> anyhow::Result<OsString> {
        let mut dirs = self
            .environment
            .binary_dirs(Some(&self.environment_name));
        if let Some(existing) = std::env::var_os("PATH") {
            dirs.extend(std::env::split_paths(&existing));
        }
        std::env::join_paths(dirs).context("building interpreter PATH")
    }

    async fn spawn(&self) -> anyhow::Result<Bridge> {
        let environment = Some(self.environment_name.as_str());
        let python = self.environment.python_executable(environment);
        if !python.is_file() {
            bail!("python executable missing at {}", python.display());
        }
        let library = self
            .environment
            .python_library_path(environment)
            .context("locating the interpreter shared library")?;
        let prefix = self.environment.environment_prefix(environment);

        let mut command = Command::new(&python);
        command
            .arg("-u")
            .arg("-c")
            .arg(BRIDGE_SOURCE)
            .env("PATH", self.search_path()?)
            .env("CONDA_PREFIX", &prefix)
            .env("CONDA_DEFAULT_ENV", &self.environment_name)
            .env("PYTHONIOENCODING", "utf-8")
            .env("PYTHONNOUSERSITE", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(windows)]
        command.creation_flags(CREATE_NO_WINDOW);

        let mut child = command
            .spawn()
            .with_context(|| format!("launching {}", python.display()))?;
        let stdin = child.stdin.take().context("interpreter stdin unavailable")?;
        let stdout = child.stdout.take().context("interpreter stdout unavailable")?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr));
        }

        let mut bridge = Bridge {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            next_id: 1,
            torn: false,
        };
        let hello = tokio::time::timeout(STARTUP_TIMEOUT, bridge.read_reply(0))
            .await
            .context("interpreter did not answer in time")??;
        let version = hello
            .as_str()
            .and_then(|version| version.split_whitespace().next())
            .unwrap_or("unknown")
            .to_string();
        info!(
            python = %python.display(),
            library = %library.display(),
            %version,
            "interpreter started"
        );
        Ok(bridge)
    }

    async fn request(&self, request: Request<'_>) -> Result<Value, RuntimeError> {
        let mut slot = self.bridge.lock().await;
        let bridge = slot.as_mut().ok_or(RuntimeError::NotInitialized)?;
        let result = bridge.send(request).await;
        if matches!(result, Err(RuntimeError::Bridge(_))) {
            warn!("interpreter bridge failed; marking runtime dead");
            self.alive.store(false, Ordering::SeqCst);
        }
        result
    }
}

#[async_trait]
impl InterpreterHost for ProcessInterpreter {
    async fn initialize(&self) -> anyhow::Result<()> {
        let mut slot = self.bridge.lock().await;
        if let Some(stale) = slot.take() {
            warn!("replacing an interpreter left over from an interrupted start");
            stale.terminate(self.shutdown_timeout).await;
        }
        let bridge = self.spawn().await?;
        *slot = Some(bridge);
        self.alive.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) {
        let bridge = self.bridge.lock().await.take();
        self.alive.store(false, Ordering::SeqCst);
        if let Some(bridge) = bridge {
            bridge.terminate(self.shutdown_timeout).await;
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn exec(&self, source: &str) -> Result<(), RuntimeError> {
        self.request(Request::Exec { source }).await.map(|_| ())
    }

    async fn call(&self, function: &str, args: Vec<Value>) -> Result<Value, RuntimeError> {
        self.request(Request::Call {
            function,
            args: &args,
        })
        .await
    }
}

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Request<'a> {
    Exec { source: &'a str },
    Call { function: &'a str, args: &'a [Value] },
}

#[derive(Serialize)]
struct Envelope<'a> {
    id: u64,
    #[serde(flatten)]
    request: Request<'a>,
}

#[derive(Deserialize)]
struct Reply {
    id: Option<u64>,
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<String>,
}

struct Bridge {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
    // set while a request line is being written; still set means a caller
    // gave up mid-write and stdin holds a partial line
    torn: bool,
}

impl Bridge {
    async fn send(&mut self, request: Request<'_>) -> Result<Value, RuntimeError> {
        if self.torn {
            return Err(RuntimeError::Bridge(anyhow!(
                "an abandoned request left a partial line on the interpreter's stdin"
            )));
        }
        let id = self.next_id;
        self.next_id += 1;
        let mut line = serde_json::to_string(&Envelope { id, request })
            .map_err(|error| RuntimeError::Bridge(error.into()))?;
        line.push('\n');
        self.torn = true;
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|error| RuntimeError::Bridge(error.into()))?;
        self.stdin
            .flush()
            .await
            .map_err(|error| RuntimeError::Bridge(error.into()))?;
        self.torn = false;
        self.read_reply(id).await
    }

    // replies to requests whose caller gave up are skipped
    async fn read_reply(&mut self, id: u64) -> Result<Value, RuntimeError> {
        loop {
            let line = self
                .stdout
                .next_line()
                .await
                .map_err(|error| RuntimeError::Bridge(error.into()))?
                .ok_or_else(|| RuntimeError::Bridge(anyhow!("interpreter exited")))?;
            let reply: Reply = serde_json::from_str(&line).map_err(|error| {
                RuntimeError::Bridge(anyhow!(error).context("malformed interpreter reply"))
            })?;
            if reply.id != Some(id) {
                debug!(expected = id, got = ?reply.id, "discarding stale interpreter reply");
                continue;
            }
            return if reply.ok {
                Ok(reply.value)
            } else {
                Err(RuntimeError::Call(
                    reply.error.unwrap_or_else(|| "unknown error".into()),
                ))
            };
        }
    }

    async fn terminate(self, timeout: Duration) {
        let Bridge {
            mut child, stdin, ..
        } = self;
        // closing stdin ends the serve loop
        drop(stdin);
        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => debug!(?status, "interpreter exited"),
            Ok(Err(error)) => warn!("waiting for interpreter failed: {error}"),
            Err(_) => {
                warn!("interpreter did not exit in time; killing it");
                if let Err(error) = child.kill().await {
                    warn!("killing interpreter failed: {error}");
                }
            }
        }
    }
}

async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "desktop_eye::interpreter", "{line}");
    }
}
