//! Host side of an isolated object
//!
//! `ObjectProxy` starts a worker process and forwards calls to it over the
//! worker's stdin/stdout. It implements the same `RpcObject` interface as
//! the object it stands in for. Calls are serialised and each one is
//! bounded by a timeout; a dead or hung worker surfaces as a proxy error.

use super::envelope::{Args, Request};
use super::object::RpcObject;
use super::worker::{WorkerReply, WorkerRequest, NAME_METHOD, STATIC_ROOT_METHOD};
use crate::utils::{AppError, AppResult};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde_json::Value;
use std::ffi::OsString;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// How to launch a worker: `program args... <kind> --args <json>`
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl WorkerCommand {
    /// Re-run the current executable with `args` before the kind
    pub fn current_exe(args: Vec<OsString>) -> AppResult<Self> {
        Ok(Self {
            program: std::env::current_exe()?,
            args,
        })
    }
}

struct Connection {
    child: Child,
    stdin: Option<ChildStdin>,
    replies: Receiver<WorkerReply>,
}

pub struct ObjectProxy {
    kind: String,
    name: String,
    timeout: Duration,
    connection: Mutex<Connection>,
}

impl ObjectProxy {
    /// Start a worker hosting an object of `kind` and wait for it to answer
    pub fn spawn(command: &WorkerCommand, kind: &str, args: &Args, timeout: Duration) -> AppResult<Self> {
        let mut process = Command::new(&command.program);
        process
            .args(&command.args)
            .arg(kind)
            .arg("--args")
            .arg(serde_json::to_string(args)?)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        // Terminal signals go to the node only; the node stops its workers
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut process, 0);

        let mut child = process
            .spawn()
            .map_err(|e| AppError::Proxy(format!("Failed to start worker for {}: {}", kind, e)))?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Proxy("Failed to capture worker stdout".to_string()))?;

        let (reply_tx, reply_rx) = crossbeam_channel::unbounded();
        std::thread::Builder::new()
            .name(format!("{}-proxy", kind))
            .spawn(move || read_replies(stdout, reply_tx))?;

        let mut proxy = Self {
            kind: kind.to_string(),
            name: kind.to_string(),
            timeout,
            connection: Mutex::new(Connection {
                child,
                stdin,
                replies: reply_rx,
            }),
        };

        match proxy.request(NAME_METHOD, &Args::default()) {
            Ok(Value::String(name)) => proxy.name = name,
            Ok(other) => {
                proxy.terminate()?;
                return Err(AppError::Proxy(format!("Worker for {} sent bad name {}", kind, other)));
            }
            Err(error) => {
                if let Err(terminate_error) = proxy.terminate() {
                    tracing::warn!("Failed to reap worker for {}: {}", kind, terminate_error);
                }
                return Err(error);
            }
        }

        tracing::info!("Worker for {} ({}) ready", proxy.kind, proxy.name);
        Ok(proxy)
    }

    fn request(&self, method: &str, args: &Args) -> AppResult<Value> {
        let mut connection = self.connection.lock();
        let id = Uuid::new_v4();
        let line = serde_json::to_string(&WorkerRequest {
            id,
            request: Request::new(method, args.clone()),
        })?;

        let stdin = connection
            .stdin
            .as_mut()
            .ok_or_else(|| AppError::Proxy(format!("Worker for {} is shut down", self.kind)))?;
        writeln!(stdin, "{}", line)
            .and_then(|_| stdin.flush())
            .map_err(|e| AppError::Proxy(format!("Worker for {} unreachable: {}", self.kind, e)))?;

        let deadline = Instant::now() + self.timeout;
        loop {
            match connection.replies.recv_deadline(deadline) {
                Ok(reply) if reply.id == id => return reply.into_result(),
                Ok(reply) => {
                    tracing::debug!("Discarding stale reply {} from {} worker", reply.id, self.kind);
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(AppError::Proxy(format!(
                        "{}.{} timed out after {:?}",
                        self.name, method, self.timeout
                    )));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(AppError::Proxy(format!("Worker for {} exited", self.kind)));
                }
            }
        }
    }

    /// Close the worker's input and reap it, killing it if it does not
    /// exit within the call timeout. Safe to call more than once.
    pub fn terminate(&self) -> AppResult<()> {
        let mut connection = self.connection.lock();
        connection.stdin.take();

        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(status) = connection.child.try_wait()? {
                tracing::debug!("Worker for {} exited with {}", self.kind, status);
                return Ok(());
            }
            if Instant::now() >= deadline {
                tracing::warn!("Worker for {} did not exit, killing it", self.kind);
                connection.child.kill()?;
                connection.child.wait()?;
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

impl RpcObject for ObjectProxy {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn call(&self, method: &str, args: &Args) -> AppResult<Value> {
        self.request(method, args)
    }

    fn static_root(&self) -> Option<PathBuf> {
        match self.request(STATIC_ROOT_METHOD, &Args::default()) {
            Ok(value) => serde_json::from_value(value).ok().flatten(),
            Err(error) => {
                tracing::warn!("Static root of {} unavailable: {}", self.name, error);
                None
            }
        }
    }
}

impl Drop for ObjectProxy {
    fn drop(&mut self) {
        if let Err(error) = self.terminate() {
            tracing::warn!("Failed to stop worker for {}: {}", self.kind, error);
        }
    }
}

fn read_replies(stdout: ChildStdout, replies: Sender<WorkerReply>) {
    for line in BufReader::new(stdout).lines() {
        let line = match line {
            Ok(line) => line,
            Err(error) => {
                tracing::warn!("Worker output unreadable: {}", error);
                break;
            }
        };
        match serde_json::from_str::<WorkerReply>(&line) {
            Ok(reply) => {
                if replies.send(reply).is_err() {
                    break;
                }
            }
            Err(error) => tracing::warn!("Ignoring malformed worker reply: {}", error),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::utils::ErrorCode;

    fn shell(script: &str) -> WorkerCommand {
        WorkerCommand {
            program: PathBuf::from("sh"),
            args: vec!["-c".into(), script.into(), "worker".into()],
        }
    }

    #[test]
    fn test_worker_that_exits_is_reported() {
        let result = ObjectProxy::spawn(&shell("exit 0"), "camera", &Args::default(), Duration::from_secs(5));

        match result {
            Err(error) => assert_eq!(error.code(), ErrorCode::ProxyError),
            Ok(_) => panic!("spawn should fail"),
        }
    }

    #[test]
    fn test_hung_worker_times_out_and_is_killed() {
        let t0 = Instant::now();
        let result = ObjectProxy::spawn(&shell("sleep 30"), "camera", &Args::default(), Duration::from_millis(200));

        match result {
            Err(error) => assert!(error.to_string().contains("timed out")),
            Ok(_) => panic!("spawn should time out"),
        }
        assert!(t0.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_missing_program_is_proxy_error() {
        let command = WorkerCommand {
            program: PathBuf::from("/nonexistent/pi-monitor-worker"),
            args: Vec::new(),
        };
        let result = ObjectProxy::spawn(&command, "camera", &Args::default(), Duration::from_secs(1));

        assert!(matches!(result, Err(AppError::Proxy(_))));
    }
}
