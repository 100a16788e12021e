// SPDX-License-Identifier: GPL-3.0-only

//! Workspace config at `<workspace>/.sqlrs/config.yaml`
//!
//! Kept as an untyped YAML tree so keys written by other commands survive an
//! `init --update`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde_yaml::{Mapping, Value};

use crate::init::InitOutcome;

pub const CONFIG_DIR: &str = ".sqlrs";
pub const CONFIG_FILE: &str = "config.yaml";

pub fn config_path(workspace: &Path) -> PathBuf {
    workspace.join(CONFIG_DIR).join(CONFIG_FILE)
}

/// Load the config, or an empty mapping when there is none yet
pub fn load(path: &Path) -> Result<Value> {
    if !path.exists() {
        return Ok(Value::Mapping(Mapping::new()));
    }

    let text = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    if text.trim().is_empty() {
        return Ok(Value::Mapping(Mapping::new()));
    }

    let value: Value =
        serde_yaml::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))?;
    if !value.is_mapping() {
        bail!("{} must contain a YAML mapping", path.display());
    }
    Ok(value)
}

pub fn save(path: &Path, config: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let text = serde_yaml::to_string(config)?;
    fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Set a nested key, replacing any non-mapping value on the way
pub fn set(config: &mut Value, keys: &[&str], value: impl Into<Value>) {
    let Some((last, parents)) = keys.split_last() else {
        return;
    };

    let mut node = config;
    for key in parents {
        if !node.is_mapping() {
            *node = Value::Mapping(Mapping::new());
        }
        let Value::Mapping(map) = node else {
            return;
        };
        node = map
            .entry(Value::from(*key))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
    }

    if !node.is_mapping() {
        *node = Value::Mapping(Mapping::new());
    }
    if let Value::Mapping(map) = node {
        map.insert(Value::from(*last), value.into());
    }
}

/// Remove a nested key if present
pub fn remove(config: &mut Value, keys: &[&str]) {
    let Some((last, parents)) = keys.split_last() else {
        return;
    };

    let mut node = config;
    for key in parents {
        match node.get_mut(*key) {
            Some(child) => node = child,
            None => return,
        }
    }
    if let Value::Mapping(map) = node {
        map.remove(*last);
    }
}

/// Record the resolved backend and store; WSL mount details only when WSL is in use
pub fn apply_outcome(config: &mut Value, outcome: &InitOutcome) {
    set(config, &["snapshot", "backend"], outcome.backend.as_str());
    set(config, &["engine", "storePath"], outcome.store_path.as_str());

    let Some(mode) = outcome.wsl_mode else {
        remove(config, &["engine", "wsl"]);
        return;
    };

    let result = &outcome.result;
    set(config, &["engine", "wsl", "mode"], mode);

    let optional = [
        (&["engine", "wsl", "distro"][..], &result.distro),
        (&["engine", "wsl", "stateDir"][..], &result.state_dir),
        (&["engine", "wsl", "mount", "device"][..], &result.mount_device),
        (&["engine", "wsl", "mount", "fstype"][..], &result.mount_fs_type),
        (&["engine", "wsl", "mount", "deviceUUID"][..], &result.mount_device_uuid),
        (&["engine", "wsl", "mount", "unit"][..], &result.mount_unit),
    ];
    for (keys, value) in optional {
        match value {
            Some(value) => set(config, keys, value.as_str()),
            None => remove(config, keys),
        }
    }
}
