//! Child-process execution with captured output and cancellation

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::env::ToolEnv;
use super::{DriverError, TestRunner};
use crate::cancel::CancellationToken;
use crate::manifest::UnifiedEntry;
use crate::runner::TestRunResult;

/// Lines of tool output kept in failure diagnostics
pub const DIAGNOSTIC_TAIL_LINES: usize = 40;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Last `n` lines of `text`
pub fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

/// One external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    pub env: ToolEnv,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            env: ToolEnv::default(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, env: ToolEnv) -> Self {
        self.env = env;
        self
    }

    /// Command line for logs
    pub fn display(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            success: true,
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            success: false,
            stderr: stderr.into(),
            ..Default::default()
        }
    }

    /// stdout followed by stderr
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// Runs external commands to completion.
pub trait CommandRunner: Send + Sync {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, DriverError>;
}

/// [`CommandRunner`] backed by `std::process`
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    cancel: CancellationToken,
}

impl ProcessRunner {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    fn spawn(&self, invocation: &Invocation) -> Result<Child, DriverError> {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .env_clear()
            .envs(invocation.env.vars())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &invocation.current_dir {
            command.current_dir(dir);
        }

        command.spawn().map_err(|source| DriverError::Spawn {
            program: invocation.program.display().to_string(),
            source,
        })
    }
}

fn drain<R: Read + Send + 'static>(stream: Option<R>) -> Option<thread::JoinHandle<String>> {
    stream.map(|mut stream| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stream.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join(handle: Option<thread::JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

impl CommandRunner for ProcessRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, DriverError> {
        if self.cancel.is_cancelled() {
            return Err(DriverError::Cancelled);
        }

        debug!(command = %invocation.display(), cwd = ?invocation.current_dir, "spawning");
        let start = Instant::now();
        let mut child = self.spawn(invocation)?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = loop {
            if self.cancel.is_cancelled() {
                warn!(program = %invocation.program.display(), "terminating child after cancellation");
                let _ = child.kill();
                let _ = child.wait();
                let _ = join(stdout);
                let _ = join(stderr);
                return Err(DriverError::Cancelled);
            }
            match child.try_wait()? {
                Some(status) => break status,
                None => thread::sleep(POLL_INTERVAL),
            }
        };

        Ok(CommandOutput {
            exit_code: status.code(),
            success: status.success(),
            stdout: join(stdout),
            stderr: join(stderr),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// [`TestRunner`] that executes staged test binaries directly
pub struct ProcessTestRunner<R: CommandRunner = ProcessRunner> {
    runner: R,
    env: ToolEnv,
}

impl<R: CommandRunner> ProcessTestRunner<R> {
    pub fn new(runner: R, env: ToolEnv) -> Self {
        Self { runner, env }
    }
}

impl<R: CommandRunner> TestRunner for ProcessTestRunner<R> {
    fn run_test(&self, entry: &UnifiedEntry, work_dir: &Path) -> TestRunResult {
        let binary = work_dir.join(&entry.packaged_path);
        if !binary.is_file() {
            return TestRunResult::error(&entry.name, format!("test binary not found: {}", binary.display()), 0);
        }

        let invocation = Invocation::new(binary).current_dir(work_dir).env(self.env.clone());
        match self.runner.run(&invocation) {
            Ok(out) if out.success => TestRunResult::pass(&entry.name, out.duration_ms),
            Ok(out) => {
                let mut diagnostic = format!("exit code {:?}", out.exit_code);
                let output = out.combined();
                if !output.trim().is_empty() {
                    diagnostic.push('\n');
                    diagnostic.push_str(&tail_lines(&output, DIAGNOSTIC_TAIL_LINES));
                }
                TestRunResult::fail(&entry.name, diagnostic, out.duration_ms)
            }
            Err(e) => TestRunResult::error(&entry.name, e.to_string(), 0),
        }
    }
}
