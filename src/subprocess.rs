// src/subprocess.rs

use crate::{
    capture::{self, Mirror},
    command::{self, CommandError, Invocation},
    spawner::{SpawnerError, SpawnerTable},
};
use std::borrow::Cow;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error(transparent)]
    Spawner(#[from] SpawnerError),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("command '{command}' could not be started: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("could not obtain a pipe to the child's {stream} stream")]
    PipeSetup { stream: &'static str },
    #[error("failed while waiting for command '{command}': {source}")]
    Wait {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to capture the child's {stream} stream: {source}")]
    OutputCapture {
        stream: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("exited ungracefully with a non-zero exit code ({code})")]
    UngracefulExit { code: i32 },
}

/// Exit code reported until the child has finished, and for children
/// terminated by a signal rather than a normal exit.
pub const EXIT_CODE_PENDING: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    NotStarted,
    Running,
    Finished,
}

/// Configuration for a subprocess. Fixed once execution starts.
///
/// By default the child's output is mirrored to the parent's own stdout and
/// stderr as it arrives; the `hide_*` flags suppress that per stream.
/// Capture into the in-memory buffers always happens.
#[derive(Debug, Clone, Default)]
pub struct CommandConfig {
    /// Arguments appended to the command, sanitized unless
    /// `shell_passthrough` is set.
    pub args: Vec<String>,
    /// `KEY=VALUE` overrides applied on top of the inherited environment,
    /// in order.
    pub env: Vec<String>,
    /// Directory the child starts in; `None` inherits the parent's.
    pub working_dir: Option<PathBuf>,
    /// Suppress mirroring of the child's stdout.
    pub hide_stdout: bool,
    /// Suppress mirroring of the child's stderr.
    pub hide_stderr: bool,
    /// Hand the full command line to the shell for its own parsing.
    pub shell_passthrough: bool,
    /// Turn a non-zero exit code into an error.
    pub catch_non_zero_exit: bool,
}

impl CommandConfig {
    /// An empty configuration: no arguments, mirroring on, sanitized mode.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one sanitized argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several sanitized arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Appends one `KEY=VALUE` environment override.
    pub fn env_var(mut self, entry: impl Into<String>) -> Self {
        self.env.push(entry.into());
        self
    }

    /// Appends several `KEY=VALUE` environment overrides.
    pub fn env_vars<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env.extend(entries.into_iter().map(Into::into));
        self
    }

    /// Starts the child in `path` instead of the parent's current directory.
    /// The override goes directly into process creation; the parent's own
    /// current directory is never touched.
    pub fn working_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(path.into());
        self
    }

    /// Stops mirroring the child's stdout to the parent's stdout.
    pub fn hide_stdout(mut self) -> Self {
        self.hide_stdout = true;
        self
    }

    /// Stops mirroring the child's stderr to the parent's stderr.
    pub fn hide_stderr(mut self) -> Self {
        self.hide_stderr = true;
        self
    }

    /// Hides all mirrored output.
    pub fn silent(mut self) -> Self {
        self.hide_stdout = true;
        self.hide_stderr = true;
        self
    }

    /// Hands the command and arguments to the shell verbatim, without
    /// per-argument sanitization. Shell metacharacters, pipes and
    /// redirection become available, as does injection. Opt-in only.
    pub fn shell_passthrough(mut self) -> Self {
        self.shell_passthrough = true;
        self
    }

    /// Treats a non-zero exit code as an `UngracefulExit` error. Without
    /// this flag a non-zero exit is reported only through `exit_code()`.
    pub fn catch_non_zero_exit(mut self) -> Self {
        self.catch_non_zero_exit = true;
        self
    }
}

/// A monitored child process executed through the host shell.
///
/// A `Subprocess` is created `NotStarted`, becomes `Running` when the native
/// process starts, and reaches `Finished` exactly once, when the child has
/// exited and both output streams are fully drained. A finished subprocess
/// is never restarted.
#[derive(Debug)]
pub struct Subprocess {
    command: String,
    config: CommandConfig,
    state: State,
    exit_code: i32,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl Subprocess {
    /// Creates a subprocess for `command` with the given configuration.
    pub fn new(command: impl Into<String>, config: CommandConfig) -> Self {
        Self {
            command: command.into(),
            config,
            state: State::NotStarted,
            exit_code: EXIT_CODE_PENDING,
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }

    /// Runs the subprocess to completion on the calling thread.
    ///
    /// Resolves a spawner for the host OS, assembles the invocation, starts
    /// the native process, drains stdout and stderr concurrently with the
    /// wait for exit, and records the exit code. Returns `UngracefulExit`
    /// only when `catch_non_zero_exit` is set and the code is non-zero;
    /// resolution, assembly, spawn and wait failures are returned as their
    /// own variants. Nothing is retried internally.
    pub fn exec(&mut self) -> Result<(), ExecutionError> {
        let table = SpawnerTable::for_host()?;
        let spawner = table.resolve()?;
        let invocation = Invocation::assemble(
            &spawner,
            &self.command,
            &self.config.args,
            self.config.shell_passthrough,
        )?;
        log::debug!(
            "Executing '{}' via '{}' {:?}.",
            self.command,
            invocation.program,
            invocation.args
        );

        let mut native = Command::new(invocation.program);
        native
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        for entry in &self.config.env {
            let (key, value) = command::split_env_entry(entry)?;
            native.env(key, value);
        }
        if let Some(dir) = &self.config.working_dir {
            native.current_dir(dunce::simplified(dir));
        }

        let mut child = native.spawn().map_err(|source| ExecutionError::Spawn {
            command: self.command.clone(),
            source,
        })?;
        self.state = State::Running;

        let outcome = self.supervise(&mut child);
        if outcome.is_err() && self.state != State::Finished {
            // Supervision failed mid-flight; don't leave the child unreaped.
            let _ = child.kill();
            let _ = child.wait();
        }
        outcome
    }

    /// Drains both output streams while waiting for the child to exit.
    /// The two drains and the wait progress concurrently; all three must
    /// complete before the subprocess is `Finished`.
    fn supervise(&mut self, child: &mut Child) -> Result<(), ExecutionError> {
        let stdout = child
            .stdout
            .take()
            .ok_or(ExecutionError::PipeSetup { stream: "stdout" })?;
        let stderr = child
            .stderr
            .take()
            .ok_or(ExecutionError::PipeSetup { stream: "stderr" })?;

        let stdout_mirror = (!self.config.hide_stdout).then_some(Mirror::Stdout);
        let stderr_mirror = (!self.config.hide_stderr).then_some(Mirror::Stderr);

        let stdout_drain = capture::spawn_drain("stdout", stdout, stdout_mirror).map_err(
            |source| ExecutionError::OutputCapture {
                stream: "stdout",
                source,
            },
        )?;
        let stderr_drain = capture::spawn_drain("stderr", stderr, stderr_mirror).map_err(
            |source| ExecutionError::OutputCapture {
                stream: "stderr",
                source,
            },
        )?;

        let status = child.wait().map_err(|source| ExecutionError::Wait {
            command: self.command.clone(),
            source,
        })?;

        self.stdout = join_drain(stdout_drain, "stdout")?;
        self.stderr = join_drain(stderr_drain, "stderr")?;

        self.exit_code = status.code().unwrap_or(EXIT_CODE_PENDING);
        self.state = State::Finished;
        log::debug!(
            "Command '{}' finished with exit code {}.",
            self.command,
            self.exit_code
        );

        if self.config.catch_non_zero_exit && self.exit_code != 0 {
            return Err(ExecutionError::UngracefulExit {
                code: self.exit_code,
            });
        }
        Ok(())
    }

    /// Runs `exec` on a dedicated worker thread.
    ///
    /// Ownership of the subprocess moves to the worker; the returned handle
    /// resolves exactly once, handing the subprocess back together with the
    /// result `exec` would have returned.
    pub fn exec_async(mut self) -> ExecHandle {
        let worker = thread::spawn(move || {
            let outcome = self.exec();
            (self, outcome)
        });
        ExecHandle { worker }
    }

    /// The command this subprocess runs.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// The configuration this subprocess was created with.
    pub fn config(&self) -> &CommandConfig {
        &self.config
    }

    /// The recorded exit code, or [`EXIT_CODE_PENDING`] until the child has
    /// finished.
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// True once the child has exited and both streams are drained.
    pub fn is_finished(&self) -> bool {
        self.state == State::Finished
    }

    /// True while the native process is executing.
    pub fn is_running(&self) -> bool {
        self.state == State::Running
    }

    /// The bytes the child wrote to stdout, in delivery order.
    pub fn stdout(&self) -> &[u8] {
        &self.stdout
    }

    /// The child's stdout decoded as text, lossily.
    pub fn stdout_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    /// The bytes the child wrote to stderr, in delivery order.
    pub fn stderr(&self) -> &[u8] {
        &self.stderr
    }

    /// The child's stderr decoded as text, lossily.
    pub fn stderr_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }

    /// The working-directory override, simplified for the host OS.
    pub fn working_dir(&self) -> Option<&Path> {
        self.config.working_dir.as_deref().map(dunce::simplified)
    }
}

fn join_drain(
    handle: JoinHandle<io::Result<Vec<u8>>>,
    stream: &'static str,
) -> Result<Vec<u8>, ExecutionError> {
    match handle.join() {
        Ok(bytes) => bytes.map_err(|source| ExecutionError::OutputCapture { stream, source }),
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

/// One-shot handle to a subprocess executing on its own worker thread.
///
/// The handle resolves exactly once: [`ExecHandle::join`] consumes it, so a
/// second await is unrepresentable. [`ExecHandle::is_finished`] is the
/// explicit signal that the result is already available.
#[derive(Debug)]
pub struct ExecHandle {
    worker: JoinHandle<(Subprocess, Result<(), ExecutionError>)>,
}

impl ExecHandle {
    /// True once the worker has delivered its result; `join` will then
    /// return without blocking.
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Blocks until execution completes and hands back the subprocess with
    /// the result its `exec` returned. A panic on the worker thread is
    /// propagated to the caller.
    pub fn join(self) -> (Subprocess, Result<(), ExecutionError>) {
        match self.worker.join() {
            Ok(outcome) => outcome,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn random_token() -> String {
        let mut token = uuid::Uuid::new_v4().simple().to_string();
        token.truncate(16);
        token
    }

    #[test]
    fn test_exit_code_is_pending_before_execution() {
        let s = Subprocess::new("ls", CommandConfig::new());
        assert_eq!(s.exit_code(), EXIT_CODE_PENDING);
        assert!(!s.is_finished());
        assert!(!s.is_running());
    }

    #[cfg(unix)]
    #[test]
    fn test_exec_reports_the_true_exit_status() {
        init_logging();
        for code in [0, 1, 7, 255] {
            let mut s = Subprocess::new(format!("exit {code}"), CommandConfig::new().silent());
            s.exec().unwrap();
            assert_eq!(s.exit_code(), code);
            assert!(s.is_finished());
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_stdout_token_is_captured() {
        init_logging();
        let token = random_token();
        let mut s = Subprocess::new(
            "printf",
            CommandConfig::new().arg(&token).silent(),
        );
        s.exec().unwrap();
        assert!(s.stdout_text().contains(&token));
        assert!(!s.stderr_text().contains(&token));
    }

    #[cfg(unix)]
    #[test]
    fn test_stderr_token_is_captured() {
        let token = random_token();
        let mut s = Subprocess::new(
            format!(">&2 echo {token}"),
            CommandConfig::new().shell_passthrough().silent(),
        );
        s.exec().unwrap();
        assert!(s.stderr_text().contains(&token));
        assert!(!s.stdout_text().contains(&token));
    }

    #[cfg(unix)]
    #[test]
    fn test_sanitized_metacharacters_stay_literal() {
        let mut s = Subprocess::new(
            "printf",
            CommandConfig::new().args(["%s", "a;b|c $(echo hacked)"]),
        );
        s.exec().unwrap();
        assert_eq!(s.stdout_text(), "a;b|c $(echo hacked)");
    }

    #[cfg(unix)]
    #[test]
    fn test_passthrough_lets_the_shell_interpret() {
        let mut s = Subprocess::new(
            "echo hello | tr a-z A-Z",
            CommandConfig::new().shell_passthrough().silent(),
        );
        s.exec().unwrap();
        assert!(s.stdout_text().contains("HELLO"));
    }

    #[cfg(unix)]
    #[test]
    fn test_catch_non_zero_exit() {
        let mut s = Subprocess::new(
            "exit 1",
            CommandConfig::new().silent().catch_non_zero_exit(),
        );
        let err = s.exec().unwrap_err();
        assert!(matches!(err, ExecutionError::UngracefulExit { code: 1 }));
        assert_eq!(s.exit_code(), 1);

        // The same run without the flag is not an error.
        let mut s = Subprocess::new("exit 1", CommandConfig::new().silent());
        s.exec().unwrap();
        assert_eq!(s.exit_code(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_environment_override_reaches_the_child() {
        let token = random_token();
        let mut s = Subprocess::new(
            "printf \"$SUBSHELL_TEST_TOKEN\"",
            CommandConfig::new()
                .env_var(format!("SUBSHELL_TEST_TOKEN={token}"))
                .silent(),
        );
        s.exec().unwrap();
        assert!(s.stdout_text().contains(&token));
    }

    #[cfg(unix)]
    #[test]
    fn test_working_dir_override() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let ambient_before = std::env::current_dir()?;

        let mut s = Subprocess::new(
            "pwd",
            CommandConfig::new().working_dir(dir.path()).silent(),
        );
        s.exec()?;

        let reported = PathBuf::from(s.stdout_text().trim()).canonicalize()?;
        assert_eq!(reported, dir.path().canonicalize()?);
        assert_eq!(std::env::current_dir()?, ambient_before);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_working_dir_is_untouched_on_error_paths() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let ambient_before = std::env::current_dir()?;

        let mut s = Subprocess::new(
            "exit 1",
            CommandConfig::new()
                .working_dir(dir.path())
                .silent()
                .catch_non_zero_exit(),
        );
        assert!(s.exec().is_err());
        assert_eq!(std::env::current_dir()?, ambient_before);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_concurrent_async_runs_stay_independent() {
        let token_a = random_token();
        let token_b = random_token();

        let a = Subprocess::new(
            format!("printf {token_a}; exit 3"),
            CommandConfig::new().shell_passthrough().silent(),
        );
        let b = Subprocess::new(
            format!("printf {token_b}; exit 5"),
            CommandConfig::new().shell_passthrough().silent(),
        );

        let handle_a = a.exec_async();
        let handle_b = b.exec_async();

        let (a, result_a) = handle_a.join();
        let (b, result_b) = handle_b.join();

        result_a.unwrap();
        result_b.unwrap();
        assert_eq!(a.exit_code(), 3);
        assert_eq!(b.exit_code(), 5);
        assert!(a.stdout_text().contains(&token_a));
        assert!(!a.stdout_text().contains(&token_b));
        assert!(b.stdout_text().contains(&token_b));
        assert!(!b.stdout_text().contains(&token_a));
        assert!(a.is_finished() && b.is_finished());
    }

    #[cfg(unix)]
    #[test]
    fn test_async_handle_reports_completion() {
        let s = Subprocess::new("exit 0", CommandConfig::new().silent());
        let handle = s.exec_async();

        let mut waited = 0;
        while !handle.is_finished() && waited < 2000 {
            std::thread::sleep(std::time::Duration::from_millis(5));
            waited += 5;
        }
        assert!(handle.is_finished());

        let (s, result) = handle.join();
        result.unwrap();
        assert!(s.is_finished());
        assert_eq!(s.exit_code(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_empty_command_is_an_assembly_error() {
        let mut s = Subprocess::new("   ", CommandConfig::new());
        let err = s.exec().unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Command(CommandError::EmptyCommand)
        ));
        assert!(!s.is_finished());
        assert_eq!(s.exit_code(), EXIT_CODE_PENDING);
    }

    #[cfg(unix)]
    #[test]
    fn test_malformed_env_entry_is_surfaced() {
        let mut s = Subprocess::new(
            "true",
            CommandConfig::new().env_var("NOEQUALS").silent(),
        );
        let err = s.exec().unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Command(CommandError::MalformedEnvEntry(_))
        ));
    }
}
