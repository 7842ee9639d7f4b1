// src/command.rs

use crate::spawner::ResolvedSpawner;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("no command specified to run")]
    EmptyCommand,
    #[error("argument '{0}' cannot be quoted for the shell")]
    UnquotableArgument(String),
    #[error("environment entry '{0}' is not of the form KEY=VALUE")]
    MalformedEnvEntry(String),
}

/// A fully-assembled native invocation: the spawner program and the argv
/// handed to it. The last argv element is always the command string the
/// shell will run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: &'static str,
    pub args: Vec<String>,
}

impl Invocation {
    /// Assembles the invocation for a resolved spawner.
    ///
    /// In sanitized mode (the default) every argument is quoted as an
    /// independent shell token, so embedded metacharacters reach the target
    /// program as literal data. With `shell_passthrough` the command and
    /// arguments are joined verbatim into one string that the shell parses
    /// itself; pipes and redirection work, and injection risk is the
    /// caller's.
    pub fn assemble(
        spawner: &ResolvedSpawner,
        command: &str,
        args: &[String],
        shell_passthrough: bool,
    ) -> Result<Self, CommandError> {
        let command = command.trim();
        if command.is_empty() {
            return Err(CommandError::EmptyCommand);
        }

        let mut command_line = String::from(command);
        for arg in args {
            command_line.push(' ');
            if shell_passthrough {
                command_line.push_str(arg);
            } else {
                let quoted = shlex::try_quote(arg)
                    .map_err(|_| CommandError::UnquotableArgument(arg.clone()))?;
                command_line.push_str(&quoted);
            }
        }

        let mut argv: Vec<String> = spawner.flags.iter().map(|f| (*f).to_string()).collect();
        argv.push(command_line);

        Ok(Self {
            program: spawner.program,
            args: argv,
        })
    }
}

/// Splits a `KEY=VALUE` environment entry at its first `=`.
/// A missing `=` or an empty key is an assembly error, not a silent skip.
pub(crate) fn split_env_entry(entry: &str) -> Result<(&str, &str), CommandError> {
    match entry.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key, value)),
        _ => Err(CommandError::MalformedEnvEntry(entry.to_string())),
    }
}
