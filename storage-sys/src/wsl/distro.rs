// SPDX-License-Identifier: GPL-3.0-only

//! WSL distro enumeration and selection

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistroInfo {
    pub name: String,
    pub state: String,
    pub version: u8,
    pub is_default: bool,
}

const DOCKER_DESKTOP_PREFIX: &str = "docker-desktop";

/// Parse `wsl.exe --list --verbose`
pub fn parse_distro_list(output: &str) -> Vec<DistroInfo> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }

            let (is_default, rest) = match line.strip_prefix('*') {
                Some(rest) => (true, rest.trim()),
                None => (false, line),
            };

            let columns: Vec<&str> = rest.split_whitespace().collect();
            if columns.len() < 3 || columns[0] == "NAME" {
                return None;
            }

            Some(DistroInfo {
                name: columns[0].to_string(),
                state: columns[1].to_string(),
                version: columns[2].parse().ok()?,
                is_default,
            })
        })
        .collect()
}

fn is_docker_desktop(distro: &DistroInfo) -> bool {
    distro.name.to_lowercase().starts_with(DOCKER_DESKTOP_PREFIX)
}

/// Pick the requested distro (case-insensitive), else the default one, else the
/// first that is not a Docker Desktop helper distro.
pub fn select_distro(distros: &[DistroInfo], requested: Option<&str>) -> Result<DistroInfo, String> {
    let selected = match requested {
        Some(name) => distros
            .iter()
            .find(|distro| distro.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| format!("WSL distro {name:?} is not installed"))?,
        None => distros
            .iter()
            .find(|distro| distro.is_default && !is_docker_desktop(distro))
            .or_else(|| distros.iter().find(|distro| !is_docker_desktop(distro)))
            .ok_or_else(|| "no WSL distro installed".to_string())?,
    };

    if selected.version < 2 {
        return Err(format!(
            "WSL distro {} runs WSL {}; the btrfs store needs WSL 2 (wsl.exe --set-version {} 2)",
            selected.name, selected.version, selected.name
        ));
    }

    Ok(selected.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "  NAME                   STATE           VERSION\r\n\
* docker-desktop         Running         2\r\n\
  Ubuntu-22.04           Stopped         2\r\n\
  Legacy                 Stopped         1\r\n";

    #[test]
    fn parses_verbose_listing() {
        let distros = parse_distro_list(LISTING);
        assert_eq!(distros.len(), 3);
        assert!(distros[0].is_default);
        assert_eq!(distros[1].name, "Ubuntu-22.04");
        assert_eq!(distros[1].state, "Stopped");
        assert_eq!(distros[2].version, 1);
    }

    #[test]
    fn skips_docker_desktop_when_choosing_a_default() {
        let distros = parse_distro_list(LISTING);
        assert_eq!(select_distro(&distros, None).unwrap().name, "Ubuntu-22.04");
        assert_eq!(select_distro(&distros, Some("ubuntu-22.04")).unwrap().name, "Ubuntu-22.04");
    }

    #[test]
    fn rejects_missing_and_wsl1_distros() {
        let distros = parse_distro_list(LISTING);
        assert!(select_distro(&distros, Some("Debian")).unwrap_err().contains("not installed"));
        assert!(select_distro(&distros, Some("Legacy")).unwrap_err().contains("WSL 2"));
        assert!(select_distro(&[], None).is_err());
    }
}
