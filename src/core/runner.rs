//! Subprocess execution with privilege escalation and timeouts.
//!
//! Every external tool (`openvpn`, `wg-quick`, `ip`, `resolvectl`, ...) is
//! invoked through [`CommandRunner`], so the service can be driven against a
//! scripted runner in tests.

use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Result, VpnError};

const WAIT_POLL: Duration = Duration::from_millis(50);

/// A command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Needs root; prefixed with `sudo` by [`SystemRunner`] when configured.
    pub privileged: bool,
    pub timeout: Duration,
    /// Written to the child's stdin, which is then closed.
    pub stdin: Option<String>,
}

impl CommandSpec {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            privileged: false,
            timeout: crate::constants::SHORT_COMMAND_TIMEOUT,
            stdin: None,
        }
    }

    #[must_use]
    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Program and arguments joined for logs.
    #[must_use]
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// True if this is `program` and its arguments start with `prefix`.
    #[must_use]
    pub fn is(&self, program: &str, prefix: &[&str]) -> bool {
        self.program == program
            && self.args.len() >= prefix.len()
            && self.args.iter().zip(prefix).all(|(a, p)| a == p)
    }
}

/// Result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    #[must_use]
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Short description of a failure, preferring stderr.
    #[must_use]
    pub fn reason(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        match self.code {
            Some(code) => format!("exit status {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Executes external commands.
pub trait CommandRunner: Send + Sync {
    /// Runs `spec` to completion.
    ///
    /// # Errors
    ///
    /// Returns [`VpnError::ProcessLaunch`] if the program cannot be started
    /// or exceeds its timeout. A non-zero exit is not an error here; callers
    /// inspect [`CommandOutput::success`].
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Whether `program` can be found on `PATH`.
    fn has_program(&self, program: &str) -> bool;
}

/// Runs commands on the host.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    use_sudo: bool,
}

impl SystemRunner {
    /// `use_sudo` only takes effect when not already running as root.
    #[must_use]
    pub fn new(use_sudo: bool) -> Self {
        Self {
            use_sudo: use_sudo && !crate::utils::is_root(),
        }
    }

    fn build(&self, spec: &CommandSpec) -> Command {
        let mut cmd = if spec.privileged && self.use_sudo {
            let mut cmd = Command::new("sudo");
            cmd.arg("-n").arg(&spec.program);
            cmd
        } else {
            Command::new(&spec.program)
        };
        cmd.args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        log::debug!("exec: {}", spec.display());
        let mut child = self
            .build(spec)
            .spawn()
            .map_err(|e| VpnError::launch(&spec.program, format!("failed to start: {e}")))?;

        if let (Some(input), Some(mut pipe)) = (spec.stdin.as_ref(), child.stdin.take()) {
            if let Err(e) = pipe.write_all(input.as_bytes()) {
                let _ = child.kill();
                let _ = child.wait();
                return Err(VpnError::launch(&spec.program, format!("failed to write stdin: {e}")));
            }
        }

        // Drain pipes on helper threads so a chatty child cannot block on a full pipe.
        let stdout = child.stdout.take().map(|mut out| {
            thread::spawn(move || {
                let mut buf = String::new();
                let _ = out.read_to_string(&mut buf);
                buf
            })
        });
        let stderr = child.stderr.take().map(|mut err| {
            thread::spawn(move || {
                let mut buf = String::new();
                let _ = err.read_to_string(&mut buf);
                buf
            })
        });

        let deadline = Instant::now() + spec.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(VpnError::launch(
                    &spec.program,
                    format!("timed out after {}s", spec.timeout.as_secs_f32()),
                ));
            }
            thread::sleep(WAIT_POLL);
        };

        let collect = |handle: Option<thread::JoinHandle<String>>| {
            handle.and_then(|h| h.join().ok()).unwrap_or_default()
        };
        Ok(CommandOutput {
            code: status.code(),
            stdout: collect(stdout),
            stderr: collect(stderr),
        })
    }

    fn has_program(&self, program: &str) -> bool {
        std::env::var_os("PATH").is_some_and(|paths| {
            std::env::split_paths(&paths).any(|dir| dir.join(program).is_file())
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_matching() {
        let spec = CommandSpec::new("ip", ["route", "flush", "dev", "tun0"]).privileged();
        assert!(spec.is("ip", &["route", "flush"]));
        assert!(!spec.is("ip", &["link"]));
        assert!(spec.privileged);
        assert_eq!(spec.display(), "ip route flush dev tun0");
    }

    #[test]
    fn test_output_reason_prefers_stderr() {
        assert_eq!(CommandOutput::failed(1, "boom\n").reason(), "boom");
        assert_eq!(CommandOutput::failed(2, "").reason(), "exit status 2");
    }

    #[test]
    fn test_system_runner_captures_output() {
        let runner = SystemRunner::new(false);
        let out = runner.run(&CommandSpec::new("sh", ["-c", "echo hi; echo err >&2; exit 3"])).unwrap();
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stdout.trim(), "hi");
        assert_eq!(out.stderr.trim(), "err");
    }

    #[test]
    fn test_system_runner_feeds_stdin() {
        let runner = SystemRunner::new(false);
        let out = runner.run(&CommandSpec::new("cat", Vec::<String>::new()).stdin("nameserver 1.1.1.1")).unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "nameserver 1.1.1.1");
    }

    #[test]
    fn test_closed_stdin_reaps_child() {
        let runner = SystemRunner::new(false);
        let spec = CommandSpec::new("sh", ["-c", "exec 0<&-; exec sleep 5"])
            .stdin("x".repeat(4 * 1024 * 1024))
            .timeout(Duration::from_secs(10));
        let started = Instant::now();
        let err = runner.run(&spec).unwrap_err();
        assert!(err.to_string().contains("failed to write stdin"), "{err}");
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_system_runner_times_out() {
        let runner = SystemRunner::new(false);
        let spec = CommandSpec::new("sleep", ["5"]).timeout(Duration::from_millis(100));
        let err = runner.run(&spec).unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_missing_program_is_launch_error() {
        let runner = SystemRunner::new(false);
        let err = runner.run(&CommandSpec::new("definitely-not-a-real-tool", ["x"])).unwrap_err();
        assert!(matches!(err, VpnError::ProcessLaunch { .. }));
    }
}
