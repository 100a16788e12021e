// SPDX-License-Identifier: GPL-3.0-only

//! Real process execution

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::runtime::{Builder, Runtime};
use tokio::time::timeout;
use tracing::{debug, info};
use which::which;

use super::spinner::Spinner;
use super::{CommandRunner, Invocation, Target, render};
use crate::error::{Result, SysError};

const WSL_EXE: &str = "wsl.exe";
const NSENTER_PREFIX: [&str; 5] = ["nsenter", "-t", "1", "-m", "--"];

/// Runs commands on the real host.
///
/// Commands are driven through a current-thread tokio runtime so each one can be
/// bounded by a timeout and killed when it expires. Execution stays strictly
/// sequential.
pub struct OsCommandRunner {
    runtime: Runtime,
    verbose: bool,
    spinner: bool,
}

impl OsCommandRunner {
    pub fn new(verbose: bool) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            runtime,
            verbose,
            spinner: !verbose && std::io::stderr().is_terminal(),
        })
    }

    async fn execute(program: &str, args: &[String], invocation: &Invocation) -> Result<String> {
        let description = invocation.description.as_str();

        let mut command = Command::new(program);
        command
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if invocation.stdin.is_some() {
            command.stdin(Stdio::piped());
        }

        let mut child = command.spawn().map_err(|e| {
            SysError::command(description, format!("failed to start {program}: {e}"), None, "")
        })?;

        if let Some(input) = &invocation.stdin
            && let Some(mut stdin) = child.stdin.take()
        {
            stdin.write_all(input.as_bytes()).await.map_err(|e| {
                SysError::command(description, format!("failed to write stdin: {e}"), None, "")
            })?;
        }

        let output = match timeout(invocation.timeout, child.wait_with_output()).await {
            Ok(output) => output.map_err(|e| {
                SysError::command(description, format!("failed to wait for {program}: {e}"), None, "")
            })?,
            Err(_) => return Err(SysError::timeout(description, invocation.timeout)),
        };

        let stdout = decode_output(&output.stdout);
        if !output.status.success() {
            // wsl.exe reports its own errors on stdout
            let mut stderr = decode_output(&output.stderr);
            if stderr.trim().is_empty() {
                stderr = stdout;
            }
            let code = output.status.code();
            let reason = match code {
                Some(code) => format!("exit status {code}"),
                None => "terminated by signal".to_string(),
            };
            return Err(SysError::command(description, reason, code, &stderr));
        }

        Ok(stdout)
    }
}

impl CommandRunner for OsCommandRunner {
    fn run(&self, invocation: &Invocation) -> Result<String> {
        let (program, args) = translate(
            &invocation.target,
            &invocation.program,
            &invocation.args,
            self.is_root(),
        );

        if self.verbose {
            info!("+ {}", render(&program, &args));
        } else {
            debug!("+ {}", render(&program, &args));
        }

        let spinner = Spinner::start(&invocation.description, self.spinner);
        let result = self
            .runtime
            .block_on(Self::execute(&program, &args, invocation));
        spinner.finish();

        result
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        which(program).ok()
    }

    #[cfg(unix)]
    fn is_root(&self) -> bool {
        unsafe { libc::geteuid() == 0 }
    }

    // Elevation on Windows is checked per operation by the virtual disk manager
    #[cfg(not(unix))]
    fn is_root(&self) -> bool {
        false
    }
}

/// Map a logical command onto the process that actually has to be spawned
pub fn translate(target: &Target, program: &str, args: &[String], is_root: bool) -> (String, Vec<String>) {
    let logical = std::iter::once(program.to_string()).chain(args.iter().cloned());

    match target {
        Target::Host => (program.to_string(), args.to_vec()),
        Target::HostRoot if is_root => (program.to_string(), args.to_vec()),
        Target::HostRoot => ("sudo".to_string(), logical.collect()),
        Target::Wsl(distro) => {
            let mut full = vec!["-d".to_string(), distro.clone(), "--".to_string()];
            full.extend(logical);
            (WSL_EXE.to_string(), full)
        }
        Target::WslRoot { distro, nsenter } => {
            let mut full = vec![
                "-d".to_string(),
                distro.clone(),
                "-u".to_string(),
                "root".to_string(),
                "--".to_string(),
            ];
            if *nsenter {
                full.extend(NSENTER_PREFIX.iter().map(|part| part.to_string()));
            }
            full.extend(logical);
            (WSL_EXE.to_string(), full)
        }
    }
}

/// Decode process output, accepting the UTF-16LE that `wsl.exe` writes
pub fn decode_output(bytes: &[u8]) -> String {
    if looks_like_utf16le(bytes) {
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units)
            .trim_start_matches('\u{feff}')
            .replace('\0', "");
    }

    String::from_utf8_lossy(bytes).into_owned()
}

fn looks_like_utf16le(bytes: &[u8]) -> bool {
    if bytes.len() < 2 {
        return false;
    }
    if bytes.starts_with(&[0xff, 0xfe]) {
        return true;
    }
    let odd = bytes.iter().skip(1).step_by(2);
    let zeros = odd.clone().filter(|byte| **byte == 0).count();
    let total = odd.count();
    total > 0 && zeros * 2 > total
}
