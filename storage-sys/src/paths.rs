// SPDX-License-Identifier: GPL-3.0-only

//! Default store locations

use std::path::PathBuf;

/// Overrides the store root on every platform
pub const STATE_STORE_ENV: &str = "SQLRS_STATE_STORE";

/// Shell snippet printing the state base directory inside WSL
pub const WSL_STATE_BASE_SCRIPT: &str = r#"printf %s "${XDG_STATE_HOME:-$HOME/.local/state}""#;

/// Store directory relative to a state base directory
pub const STORE_SUBDIR: &str = "sqlrs/store";

/// Virtual disk file name used on Windows hosts
pub const VHDX_FILE_NAME: &str = "btrfs.vhdx";

/// Default store root for this host, from the process environment
pub fn default_store_root() -> Option<PathBuf> {
    store_root_with(&env_lookup, cfg!(windows))
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

/// Resolve the store root with an injected environment.
///
/// `SQLRS_STATE_STORE` wins. Windows uses `%LOCALAPPDATA%\sqlrs\store`, falling
/// back to `%USERPROFILE%\AppData\Local`; everything else uses
/// `$XDG_STATE_HOME/sqlrs/store` or `$HOME/.local/state/sqlrs/store`.
pub fn store_root_with(lookup: &dyn Fn(&str) -> Option<String>, windows: bool) -> Option<PathBuf> {
    if let Some(root) = lookup(STATE_STORE_ENV) {
        return Some(PathBuf::from(root));
    }

    if windows {
        let local = lookup("LOCALAPPDATA")
            .map(PathBuf::from)
            .or_else(|| lookup("USERPROFILE").map(|home| PathBuf::from(home).join("AppData").join("Local")))
            .or_else(|| lookup("HOME").map(|home| PathBuf::from(home).join("AppData").join("Local")))?;
        return Some(local.join("sqlrs").join("store"));
    }

    let base = lookup("XDG_STATE_HOME")
        .map(PathBuf::from)
        .or_else(|| lookup("HOME").map(|home| PathBuf::from(home).join(".local").join("state")))?;
    Some(base.join(STORE_SUBDIR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn override_wins_everywhere() {
        let lookup = env(&[(STATE_STORE_ENV, "/srv/sqlrs"), ("HOME", "/home/dev")]);
        assert_eq!(store_root_with(&lookup, false), Some(PathBuf::from("/srv/sqlrs")));
        assert_eq!(store_root_with(&lookup, true), Some(PathBuf::from("/srv/sqlrs")));
    }

    #[test]
    fn linux_prefers_xdg_state_home() {
        let lookup = env(&[("XDG_STATE_HOME", "/home/dev/.state"), ("HOME", "/home/dev")]);
        assert_eq!(
            store_root_with(&lookup, false),
            Some(PathBuf::from("/home/dev/.state/sqlrs/store"))
        );

        let lookup = env(&[("HOME", "/home/dev")]);
        assert_eq!(
            store_root_with(&lookup, false),
            Some(PathBuf::from("/home/dev/.local/state/sqlrs/store"))
        );
        assert_eq!(store_root_with(&env(&[]), false), None);
    }

    #[test]
    fn windows_falls_back_to_user_profile() {
        let lookup = env(&[("USERPROFILE", "C:/Users/dev")]);
        assert_eq!(
            store_root_with(&lookup, true),
            Some(PathBuf::from("C:/Users/dev").join("AppData").join("Local").join("sqlrs").join("store"))
        );
    }
}
