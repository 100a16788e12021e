// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};

pub const DEFAULT_FS_TYPE: &str = "btrfs";
pub const DEFAULT_MOUNT_OPTIONS: &str = "defaults";

/// A systemd `.mount` unit keyed by the escaped target path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountUnit {
    /// Unit file name, e.g. `home-dev-.local-state-sqlrs-store.mount`
    pub name: String,
    /// Source device (`/dev/disk/by-uuid/...` or a raw device node)
    pub what: String,
    /// Target directory
    pub r#where: String,
    pub fs_type: String,
    pub options: String,
}

impl MountUnit {
    pub fn new(name: impl Into<String>, what: impl Into<String>, r#where: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            what: what.into(),
            r#where: r#where.into(),
            fs_type: DEFAULT_FS_TYPE.to_string(),
            options: DEFAULT_MOUNT_OPTIONS.to_string(),
        }
    }

    pub fn with_fs_type(mut self, fs_type: impl Into<String>) -> Self {
        self.fs_type = fs_type.into();
        self
    }

    /// Path of the installed unit file
    pub fn unit_path(&self) -> String {
        format!("/etc/systemd/system/{}", self.name)
    }

    fn effective_fs_type(&self) -> &str {
        if self.fs_type.trim().is_empty() {
            DEFAULT_FS_TYPE
        } else {
            &self.fs_type
        }
    }

    /// Render the unit file. The same inputs always produce the same bytes.
    pub fn render(&self) -> String {
        let options = if self.options.trim().is_empty() {
            DEFAULT_MOUNT_OPTIONS
        } else {
            &self.options
        };

        format!(
            "[Unit]\n\
Description=sqlrs btrfs store ({where_})\n\
After=local-fs-pre.target\n\n\
[Mount]\n\
What={what}\n\
Where={where_}\n\
Type={fs_type}\n\
Options={options}\n\n\
[Install]\n\
WantedBy=multi-user.target\n",
            what = self.what,
            where_ = self.r#where,
            fs_type = self.effective_fs_type(),
            options = options,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::MountUnit;

    #[test]
    fn renders_mount_section_with_defaults() {
        let unit = MountUnit::new(
            "home-dev-.local-state-sqlrs-store.mount",
            "/dev/disk/by-uuid/1111-2222",
            "/home/dev/.local/state/sqlrs/store",
        )
        .with_fs_type("");

        let contents = unit.render();
        assert!(contents.contains("[Mount]\nWhat=/dev/disk/by-uuid/1111-2222\n"));
        assert!(contents.contains("Where=/home/dev/.local/state/sqlrs/store\n"));
        assert!(contents.contains("Type=btrfs\n"));
        assert!(contents.contains("Options=defaults\n"));
        assert!(contents.contains("[Install]\nWantedBy=multi-user.target\n"));
        assert_eq!(contents, unit.clone().render());
        assert_eq!(
            unit.unit_path(),
            "/etc/systemd/system/home-dev-.local-state-sqlrs-store.mount"
        );
    }
}
