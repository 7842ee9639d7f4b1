// src/spawner.rs

use std::env;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpawnerError {
    #[error("operating system '{0}' is not supported")]
    UnsupportedPlatform(String),
    #[error(
        "no subprocess spawner found in the system PATH. Spawners available for this OS: {candidates}"
    )]
    NoSpawnerAvailable { candidates: String },
}

/// A shell interpreter that can be asked to run a command string, together
/// with the flags that hand it that string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnerCandidate {
    pub program: &'static str,
    pub flags: &'static [&'static str],
}

/// Ordered list of spawner candidates for one OS family.
///
/// Position expresses priority: the first candidate present on the search
/// path wins. The list is a slice so that iteration order is fixed and
/// first-match-wins stays deterministic.
#[derive(Debug, Clone, Copy)]
pub struct SpawnerTable {
    candidates: &'static [SpawnerCandidate],
}

// On Windows the outer interpreter is always a command shell; the command
// string itself runs inside a nested PowerShell invocation.
const WINDOWS_TABLE: SpawnerTable = SpawnerTable {
    candidates: &[
        SpawnerCandidate {
            program: "cmd",
            flags: &["/C", "powershell", "-Command"],
        },
        SpawnerCandidate {
            program: "pwsh",
            flags: &["-Command"],
        },
    ],
};

const POSIX_TABLE: SpawnerTable = SpawnerTable {
    candidates: &[
        SpawnerCandidate {
            program: "bash",
            flags: &["-c"],
        },
        SpawnerCandidate {
            program: "sh",
            flags: &["-c"],
        },
    ],
};

/// A spawner located on the search path, ready to be handed a command string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSpawner {
    pub program: &'static str,
    pub flags: &'static [&'static str],
}

impl SpawnerTable {
    /// Returns the candidate table for the host operating system.
    pub fn for_host() -> Result<Self, SpawnerError> {
        Self::for_os(env::consts::OS)
    }

    /// Returns the candidate table for an OS name in `std::env::consts::OS`
    /// form, or `UnsupportedPlatform` for anything outside the supported set.
    pub fn for_os(os: &str) -> Result<Self, SpawnerError> {
        match os {
            "windows" => Ok(WINDOWS_TABLE),
            "macos" | "linux" => Ok(POSIX_TABLE),
            other => Err(SpawnerError::UnsupportedPlatform(other.to_string())),
        }
    }

    /// The candidates of this table, in priority order.
    pub fn candidates(&self) -> &'static [SpawnerCandidate] {
        self.candidates
    }

    /// Resolves the first candidate present on the `PATH`.
    ///
    /// Resolution runs fresh on every call. It is cheap next to process
    /// creation, and the environment can change between executions.
    pub fn resolve(&self) -> Result<ResolvedSpawner, SpawnerError> {
        self.resolve_in(&env::var("PATH").unwrap_or_default())
    }

    /// Resolves against an explicit search-path string instead of `PATH`.
    pub fn resolve_in(&self, search_path: &str) -> Result<ResolvedSpawner, SpawnerError> {
        for candidate in self.candidates {
            if is_executable_in(search_path, candidate.program) {
                log::debug!("Resolved subprocess spawner '{}'.", candidate.program);
                return Ok(ResolvedSpawner {
                    program: candidate.program,
                    flags: candidate.flags,
                });
            }
        }
        Err(SpawnerError::NoSpawnerAvailable {
            candidates: self
                .candidates
                .iter()
                .map(|c| c.program)
                .collect::<Vec<_>>()
                .join(", "),
        })
    }
}

fn is_executable_in(search_path: &str, program: &str) -> bool {
    let file_name = format!("{}{}", program, env::consts::EXE_SUFFIX);
    for dir in env::split_paths(search_path) {
        if dir.join(&file_name).is_file() {
            return true;
        }
    }
    false
}
