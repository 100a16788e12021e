// SPDX-License-Identifier: GPL-3.0-only

/// `lsblk -b -o NAME,SIZE,TYPE,PKNAME` output, built row by row
#[derive(Debug, Clone, Default)]
pub struct LsblkListing {
    rows: Vec<String>,
}

impl LsblkListing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disk(mut self, name: &str, size_bytes: u64) -> Self {
        self.rows.push(format!("{name} {size_bytes} disk"));
        self
    }

    pub fn part(mut self, name: &str, size_bytes: u64, parent: &str) -> Self {
        self.rows.push(format!("{name} {size_bytes} part {parent}"));
        self
    }

    pub fn render(&self) -> String {
        let mut text = String::from("NAME SIZE TYPE PKNAME\n");
        for row in &self.rows {
            text.push_str(row);
            text.push('\n');
        }
        text
    }
}

/// `wsl.exe --list --verbose` output; the first distro is the default
pub fn distro_listing(names: &[&str]) -> String {
    let mut text = String::from("  NAME                   STATE           VERSION\r\n");
    for (index, name) in names.iter().enumerate() {
        let marker = if index == 0 { '*' } else { ' ' };
        text.push_str(&format!("{marker} {name:<22} Running         2\r\n"));
    }
    text
}
