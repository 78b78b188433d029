//! `mongosh`-backed engine client
//!
//! Each command runs in a fresh `mongosh --quiet --eval` invocation that
//! prints the command response as relaxed Extended JSON on its last line.
//! The shell is killed if it outlives the command timeout.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use regex::RegexSet;
use serde_json::Value;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;
use tracing::trace;

use crate::client::{ClientError, EngineClient};

/// Shell diagnostics meaning "no server to talk to"
fn unreachable_patterns() -> &'static RegexSet {
    static PATTERNS: OnceLock<RegexSet> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        RegexSet::new([
            r"ECONNREFUSED",
            r"ECONNRESET",
            r"MongoNetworkError",
            r"MongoServerSelectionError",
            r"MongoNotConnectedError",
            r"(?i)connection \S* ?(to \S+ )?closed",
            r"(?i)server selection timed out",
        ])
        .expect("static patterns are valid")
    })
}

/// Runs database commands through the `mongosh` shell
#[derive(Debug, Clone)]
pub struct MongoShell {
    shell_bin: PathBuf,
    host: String,
    port: u16,
}

impl MongoShell {
    pub fn new(shell_bin: impl Into<PathBuf>, host: impl Into<String>, port: u16) -> Self {
        Self {
            shell_bin: shell_bin.into(),
            host: host.into(),
            port,
        }
    }

    /// Connection string; server selection gives up with the command timeout
    pub fn uri(&self, timeout: Duration) -> String {
        format!(
            "mongodb://{}:{}/?directConnection=true&serverSelectionTimeoutMS={}",
            self.host,
            self.port,
            timeout.as_millis().max(1)
        )
    }

    fn run_shell(&self, script: &str, timeout: Duration) -> Result<Output, ClientError> {
        let child = Command::new(&self.shell_bin)
            .arg(self.uri(timeout))
            .args(["--quiet", "--norc", "--eval", script])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let pid = Pid::from_raw(child.id() as i32);

        // Drain both pipes off-thread so a large reply cannot block the shell
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(child.wait_with_output());
        });

        match rx.recv_timeout(timeout) {
            Ok(output) => Ok(output?),
            Err(RecvTimeoutError::Timeout) => {
                let _ = kill(pid, Signal::SIGKILL);
                Err(ClientError::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(ClientError::Io(std::io::Error::other(
                "shell reader thread exited without a result",
            ))),
        }
    }
}

/// JavaScript that runs one command and prints the reply
pub fn command_script(database: &str, command: &Value) -> Result<String, ClientError> {
    let database = serde_json::to_string(database).map_err(|e| ClientError::Parse(e.to_string()))?;
    let command = serde_json::to_string(&command.to_string())
        .map_err(|e| ClientError::Parse(e.to_string()))?;
    Ok(format!(
        "print(EJSON.stringify(db.getSiblingDB({database}).runCommand(EJSON.parse({command})), {{relaxed: true}}))"
    ))
}

/// Classify a shell run and parse its last stdout line
pub fn parse_output(output: &Output) -> Result<Value, ClientError> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    if !output.status.success() {
        let diagnostics = format!("{} {}", stderr.trim(), stdout.trim());
        let message = diagnostics.trim().to_string();
        return if unreachable_patterns().is_match(&message) {
            Err(ClientError::Unreachable(message))
        } else {
            Err(ClientError::Command(format!("shell exited with {}: {}", output.status, message)))
        };
    }

    let line = stdout
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| ClientError::Parse("shell printed nothing".into()))?;
    serde_json::from_str(line.trim())
        .map_err(|e| ClientError::Parse(format!("{}: {}", e, line.trim())))
}

impl EngineClient for MongoShell {
    fn run_command(
        &self,
        database: &str,
        command: &Value,
        timeout: Duration,
    ) -> Result<Value, ClientError> {
        let script = command_script(database, command)?;
        trace!(database, %command, "mongosh command");
        let output = self.run_shell(&script, timeout)?;
        parse_output(&output)
    }
}
