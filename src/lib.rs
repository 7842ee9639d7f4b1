//! # subshell
//!
//! A cross-platform abstraction for launching, monitoring, and collecting
//! output from a child process, hiding the per-OS differences in how a
//! command line is routed through a shell.
//!
//! ## Modules
//!
//! - **`spawner`**: Per-OS ordered tables of candidate shell interpreters
//!   and the resolver that probes them against the executable search path.
//! - **`command`**: Assembles the resolved spawner, its flags, and the
//!   caller's command and arguments into an invocable argv, in sanitized or
//!   shell-passthrough mode.
//! - **`subprocess`**: The facade. Holds the configuration, exposes the
//!   blocking `exec` and the thread-backed `exec_async` lifecycles, and
//!   records the exit code and output buffers.
//!
//! Output capture drains the child's stdout and stderr concurrently with
//! the wait for exit, appending bytes to per-stream buffers and optionally
//! mirroring them to the parent's own streams as they arrive.
//!
//! ```no_run
//! use subshell::{CommandConfig, Subprocess};
//!
//! let mut s = Subprocess::new("ls", CommandConfig::new().arg("-lh").silent());
//! s.exec()?;
//! assert_eq!(s.exit_code(), 0);
//! println!("{}", s.stdout_text());
//! # Ok::<(), subshell::ExecutionError>(())
//! ```

mod capture;
pub mod command;
pub mod spawner;
pub mod subprocess;

pub use command::{CommandError, Invocation};
pub use spawner::{ResolvedSpawner, SpawnerCandidate, SpawnerError, SpawnerTable};
pub use subprocess::{
    CommandConfig, EXIT_CODE_PENDING, ExecHandle, ExecutionError, Subprocess,
};
