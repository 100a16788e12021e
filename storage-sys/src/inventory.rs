// SPDX-License-Identifier: GPL-3.0-only

//! Block-device inventory from `lsblk`
//!
//! Disk matching is by size only. The tolerance absorbs VHDX/virtio rounding
//! and is a heuristic, not a contract: two disks of the same size on one host
//! cannot be told apart, so that case is reported instead of guessed.

use storage_types::{BlockDeviceEntry, BlockDeviceKind, MIB};

use crate::error::{Result, SysError};
use crate::exec::{Shell, timeouts};

const LSBLK_COLUMNS: &str = "NAME,SIZE,TYPE,PKNAME";
const MIN_TOLERANCE_BYTES: u64 = 100 * MIB;

/// Run `lsblk` and parse its listing
pub fn list_block_devices(shell: &Shell<'_>) -> Result<Vec<BlockDeviceEntry>> {
    let output = shell.run_timeout(
        "list block devices",
        "lsblk",
        &["-b", "-o", LSBLK_COLUMNS],
        timeouts::QUICK,
    )?;
    parse_inventory(&output)
}

fn strip_tree_prefix(name: &str) -> (&str, bool) {
    let stripped = name.trim_start_matches(['├', '└', '─', '│', '`', '|', '-', ' ']);
    (stripped, stripped.len() != name.len())
}

/// Parse `lsblk -b -o NAME,SIZE,TYPE[,PKNAME]` output.
///
/// The header line is skipped. A partition without a PKNAME column inherits the
/// most recent disk above it in the tree. Any unparsable size fails the whole
/// parse, as does an empty listing.
pub fn parse_inventory(output: &str) -> Result<Vec<BlockDeviceEntry>> {
    let mut entries = Vec::new();
    let mut last_disk: Option<String> = None;

    for line in output.lines().skip(1) {
        if line.trim().is_empty() {
            continue;
        }

        let columns: Vec<&str> = line.split_whitespace().collect();
        let (name, nested) = strip_tree_prefix(columns[0]);
        // A lone tree glyph column ("│") before the name
        let (name, offset) = if name.is_empty() && columns.len() > 1 {
            (strip_tree_prefix(columns[1]).0, 1)
        } else {
            (name, 0)
        };
        let columns = &columns[offset..];

        if columns.len() < 3 || name.is_empty() {
            return Err(SysError::InventoryParse(format!("malformed line: {line:?}")));
        }

        let size_bytes = columns[1].parse::<u64>().map_err(|e| {
            SysError::InventoryParse(format!("invalid size {:?} for {}: {}", columns[1], name, e))
        })?;
        let kind = BlockDeviceKind::parse(columns[2]);

        let parent_name = match columns.get(3) {
            Some(parent) => Some((*parent).to_string()),
            None if nested || offset > 0 || kind == BlockDeviceKind::Part => last_disk.clone(),
            None => None,
        };

        if kind == BlockDeviceKind::Disk {
            last_disk = Some(name.to_string());
        }

        entries.push(BlockDeviceEntry {
            name: name.to_string(),
            size_bytes,
            kind,
            parent_name,
        });
    }

    if entries.is_empty() {
        return Err(SysError::InventoryParse("no block devices listed".to_string()));
    }

    Ok(entries)
}

/// Allowed size difference when matching a disk: `max(100 MiB, 1% of target)`
pub fn size_tolerance(target_bytes: u64) -> u64 {
    MIN_TOLERANCE_BYTES.max(target_bytes / 100)
}

/// Pick the single `disk` entry whose size is within tolerance of `target_bytes`.
///
/// `Ok(None)` means nothing matches yet (the disk is not attached). More than one
/// match is an error: the operator has to resolve it.
pub fn select_disk_by_size(
    entries: &[BlockDeviceEntry],
    target_bytes: u64,
) -> Result<Option<BlockDeviceEntry>> {
    let tolerance = size_tolerance(target_bytes);
    let candidates: Vec<&BlockDeviceEntry> = entries
        .iter()
        .filter(|entry| entry.is_disk() && entry.size_bytes.abs_diff(target_bytes) <= tolerance)
        .collect();

    match candidates.as_slice() {
        [] => Ok(None),
        [only] => Ok(Some((*only).clone())),
        many => Err(SysError::AmbiguousDisk {
            target_bytes,
            candidates: many.iter().map(|entry| entry.name.clone()).collect(),
        }),
    }
}

/// The largest `part` entry whose parent is `disk_name`
pub fn select_partition(entries: &[BlockDeviceEntry], disk_name: &str) -> Result<BlockDeviceEntry> {
    entries
        .iter()
        .filter(|entry| entry.is_partition() && entry.parent_name.as_deref() == Some(disk_name))
        .max_by_key(|entry| entry.size_bytes)
        .cloned()
        .ok_or_else(|| SysError::PartitionNotFound(disk_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage_types::GIB;

    const LISTING: &str = "NAME        SIZE TYPE PKNAME\n\
sda  274877906944 disk \n\
sdb    1073741824 disk \n\
sdd   10737418240 disk \n\
├─sdd1    1048576 part sdd\n\
└─sdd2 10735321088 part sdd\n";

    fn disk(name: &str, size_bytes: u64) -> BlockDeviceEntry {
        BlockDeviceEntry {
            name: name.to_string(),
            size_bytes,
            kind: BlockDeviceKind::Disk,
            parent_name: None,
        }
    }

    fn part(name: &str, size_bytes: u64, parent: &str) -> BlockDeviceEntry {
        BlockDeviceEntry {
            name: name.to_string(),
            size_bytes,
            kind: BlockDeviceKind::Part,
            parent_name: Some(parent.to_string()),
        }
    }

    #[test]
    fn parses_tree_listing_and_strips_prefixes() {
        let entries = parse_inventory(LISTING).expect("parse should succeed");

        assert_eq!(entries.len(), 5);
        assert_eq!(entries[3], part("sdd1", 1048576, "sdd"));
        assert_eq!(entries[4].name, "sdd2");
        assert!(entries[0].is_disk());
        assert_eq!(entries[0].parent_name, None);
    }

    #[test]
    fn infers_parent_from_tree_without_pkname_column() {
        let entries = parse_inventory("NAME SIZE TYPE\nsdc 1000 disk\n└─sdc1 900 part\n").unwrap();
        assert_eq!(entries[1].parent_name.as_deref(), Some("sdc"));
    }

    #[test]
    fn rejects_bad_sizes_and_empty_listings() {
        assert!(matches!(
            parse_inventory("NAME SIZE TYPE\nsda 10G disk\n"),
            Err(SysError::InventoryParse(_))
        ));
        assert!(matches!(
            parse_inventory("NAME SIZE TYPE PKNAME\n"),
            Err(SysError::InventoryParse(_))
        ));
    }

    #[test]
    fn tolerance_is_at_least_one_hundred_mib() {
        assert_eq!(size_tolerance(GIB), 100 * MIB);
        assert_eq!(size_tolerance(100 * GIB), GIB);
    }

    #[test]
    fn selects_unique_disk_within_tolerance_for_many_sizes() {
        for gib in [1_u64, 5, 10, 64, 100, 512] {
            let target = gib * GIB;
            let tolerance = size_tolerance(target);
            let entries = vec![
                disk("sda", 4096 * GIB),
                disk("sdd", target - tolerance),
                part("sdd1", target / 2, "sdd"),
            ];

            let selected = select_disk_by_size(&entries, target).unwrap();
            assert_eq!(selected.map(|entry| entry.name), Some("sdd".to_string()));

            let outside = vec![disk("sde", target + tolerance + 1)];
            assert_eq!(select_disk_by_size(&outside, target).unwrap(), None);
        }
    }

    #[test]
    fn partitions_never_count_as_disks() {
        let entries = vec![part("sdd1", 10 * GIB, "sdd")];
        assert_eq!(select_disk_by_size(&entries, 10 * GIB).unwrap(), None);
    }

    #[test]
    fn two_matching_disks_are_ambiguous() {
        let entries = vec![disk("sdd", 10 * GIB), disk("sde", 10 * GIB + MIB)];
        match select_disk_by_size(&entries, 10 * GIB) {
            Err(SysError::AmbiguousDisk { candidates, .. }) => {
                assert_eq!(candidates, vec!["sdd".to_string(), "sde".to_string()]);
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn picks_largest_partition_of_the_selected_disk() {
        let entries = parse_inventory(LISTING).unwrap();
        let selected = select_partition(&entries, "sdd").unwrap();
        assert_eq!(selected.name, "sdd2");

        let mut entries = entries;
        entries.push(part("sda1", 200 * GIB, "sda"));
        assert_eq!(select_partition(&entries, "sdd").unwrap().name, "sdd2");
        assert!(matches!(
            select_partition(&entries, "sdb"),
            Err(SysError::PartitionNotFound(name)) if name == "sdb"
        ));
    }
}
