// SPDX-License-Identifier: GPL-3.0-only

//! Container runtime health, checked softly
//!
//! Each probe is weaker than the previous one; the first success ends the check.

use tracing::debug;

use crate::exec::{Shell, timeouts};

const POWERSHELL: &str = "powershell.exe";

fn powershell_probe(host: &Shell<'_>, description: &str, script: &str) -> Option<String> {
    host.run_timeout(
        description,
        POWERSHELL,
        &["-NoProfile", "-NonInteractive", "-Command", script],
        timeouts::QUICK,
    )
    .map_err(|error| debug!("{}", error))
    .ok()
    .map(|output| output.trim().to_string())
}

/// `None` when Docker Desktop looks healthy, otherwise a warning for the operator
pub fn docker_health_warning(host: &Shell<'_>) -> Option<String> {
    let service = powershell_probe(
        host,
        "check Docker Desktop service",
        "(Get-Service -Name com.docker.service -ErrorAction Stop).Status",
    );
    if service.as_deref() == Some("Running") {
        return None;
    }

    let pipe = powershell_probe(
        host,
        "check Docker engine pipe",
        r"Test-Path '\\.\pipe\docker_engine'",
    );
    if pipe.is_some_and(|value| value.eq_ignore_ascii_case("true")) {
        return None;
    }

    if host.runner().locate("docker").is_some() {
        let server = host.run_timeout(
            "check Docker engine",
            "docker",
            &["version", "--format", "{{.Server.Version}}"],
            timeouts::QUICK,
        );
        match server {
            Ok(version) if !version.trim().is_empty() => return None,
            Ok(_) => {}
            Err(error) => debug!("{}", error),
        }
    }

    Some(
        "Docker Desktop does not appear to be running; the engine may fail to start containers until it is"
            .to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::Target;
    use crate::exec::scripted::{Reply, ScriptedRunner};

    #[test]
    fn running_service_needs_no_further_probes() {
        let runner = ScriptedRunner::new();
        runner.on(POWERSHELL, &["com.docker.service"], Reply::ok("Running\r\n"));
        let target = Target::Host;

        assert_eq!(docker_health_warning(&Shell::new(&runner, &target)), None);
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn falls_through_to_cli_probe() {
        let runner = ScriptedRunner::new();
        runner
            .on(POWERSHELL, &["com.docker.service"], Reply::fail(1, "Cannot find any service"))
            .on(POWERSHELL, &["docker_engine"], Reply::ok("False"))
            .on("docker", &["version"], Reply::ok("27.1.1\n"));
        let target = Target::Host;

        assert_eq!(docker_health_warning(&Shell::new(&runner, &target)), None);
        assert_eq!(runner.count("docker version"), 1);
    }

    #[test]
    fn all_probes_failing_is_only_a_warning() {
        let runner = ScriptedRunner::new();
        runner
            .on(POWERSHELL, &["com.docker.service"], Reply::ok("Stopped"))
            .on(POWERSHELL, &["docker_engine"], Reply::ok("False"))
            .without_tools(&["docker"]);
        let target = Target::Host;

        let warning = docker_health_warning(&Shell::new(&runner, &target)).unwrap();
        assert!(warning.contains("Docker Desktop"));
        assert_eq!(runner.count("docker version"), 0);
    }
}
