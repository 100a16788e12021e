// SPDX-License-Identifier: GPL-3.0-only

//! Command execution adapter
//!
//! Every external tool the pipeline touches goes through a [`CommandRunner`].
//! Components never spawn processes themselves; they hold a [`Shell`] which pairs
//! a runner with the [`Target`] the command must run against.

pub mod os;
#[cfg(any(test, feature = "testing"))]
pub mod scripted;
pub mod spinner;

use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;

pub use os::OsCommandRunner;

/// Duration classes for external commands
pub mod timeouts {
    use std::time::Duration;

    /// Sub-second probes (`findmnt`, `blkid`, `test -e`)
    pub const PROBE: Duration = Duration::from_secs(5);
    /// Quick checks and state queries
    pub const QUICK: Duration = Duration::from_secs(10);
    /// Booting a WSL distro
    pub const START: Duration = Duration::from_secs(20);
    /// Package manager update and install
    pub const INSTALL: Duration = Duration::from_secs(300);
    /// Everything else (formatting, VHD creation, systemd start)
    pub const DEFAULT: Duration = Duration::from_secs(120);
}

/// Where a command runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The host as the invoking user
    Host,
    /// The host with `sudo` unless already root
    HostRoot,
    /// Inside a WSL distro as its default user
    Wsl(String),
    /// Inside a WSL distro as root, entering the init mount namespace when `nsenter` exists
    WslRoot { distro: String, nsenter: bool },
}

/// One external command, fully described
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub target: Target,
    /// Human readable step name used in error messages and the spinner
    pub description: String,
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
    pub timeout: Duration,
}

impl Invocation {
    /// The logical command line, without target translation
    pub fn command_line(&self) -> String {
        render(&self.program, &self.args)
    }
}

pub fn render(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

pub trait CommandRunner {
    /// Run the command and return its stdout.
    ///
    /// A non-zero exit, a spawn failure or a timeout is an error carrying the
    /// description and trimmed stderr.
    fn run(&self, invocation: &Invocation) -> Result<String>;

    /// Locate a host executable on `PATH`
    fn locate(&self, program: &str) -> Option<PathBuf>;

    /// Whether the host process already runs as root
    fn is_root(&self) -> bool;
}

/// A runner bound to a target
#[derive(Clone, Copy)]
pub struct Shell<'a> {
    runner: &'a dyn CommandRunner,
    target: &'a Target,
}

impl<'a> Shell<'a> {
    pub fn new(runner: &'a dyn CommandRunner, target: &'a Target) -> Self {
        Self { runner, target }
    }

    pub fn runner(&self) -> &'a dyn CommandRunner {
        self.runner
    }

    pub fn target(&self) -> &'a Target {
        self.target
    }

    pub fn run(&self, description: &str, program: &str, args: &[&str]) -> Result<String> {
        self.run_timeout(description, program, args, timeouts::DEFAULT)
    }

    pub fn run_timeout(
        &self,
        description: &str,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<String> {
        self.runner
            .run(&self.invocation(description, program, args, None, timeout))
    }

    /// Run with `input` written to the command's stdin (e.g. `tee <file>`)
    pub fn run_input(
        &self,
        description: &str,
        program: &str,
        args: &[&str],
        input: &str,
    ) -> Result<String> {
        self.runner.run(&self.invocation(
            description,
            program,
            args,
            Some(input.to_string()),
            timeouts::QUICK,
        ))
    }

    fn invocation(
        &self,
        description: &str,
        program: &str,
        args: &[&str],
        stdin: Option<String>,
        timeout: Duration,
    ) -> Invocation {
        Invocation {
            target: self.target.clone(),
            description: description.to_string(),
            program: program.to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
            stdin,
            timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::scripted::ScriptedRunner;

    #[test]
    fn shell_passes_target_and_stdin_to_runner() {
        let runner = ScriptedRunner::new();
        let target = Target::WslRoot {
            distro: "Ubuntu".to_string(),
            nsenter: true,
        };
        let shell = Shell::new(&runner, &target);

        shell
            .run_input("install unit", "tee", &["/etc/systemd/system/x.mount"], "[Mount]\n")
            .expect("tee");

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].target, target);
        assert_eq!(calls[0].command_line(), "tee /etc/systemd/system/x.mount");
        assert_eq!(calls[0].stdin.as_deref(), Some("[Mount]\n"));
        assert_eq!(calls[0].timeout, timeouts::QUICK);
    }
}
