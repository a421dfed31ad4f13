// SPDX-License-Identifier: MIT

use crate::error::*;
use crate::number::produce_human_number;
use crate::partition::*;

/// Normalized device-wide constants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutMetadata {
    pub block_size: Option<u64>,
    pub fs_block_size: u64,
    /// Alignment of filesystem sizes, a multiple of `fs_block_size`.
    pub fs_align: u64,
    /// Padding between the primary GPT header and its entry array.
    pub primary_entry_array_padding_bytes: u64,
}

/// One resolved image variant: its constants, device description and
/// partition rows in disk order.
///
/// The metadata pseudo-partition is lifted into `device`; gap rows stay in
/// `partitions`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutDocument {
    pub name: String,
    pub metadata: LayoutMetadata,
    pub device: DeviceInfo,
    pub partitions: Vec<Partition>,
}

impl LayoutDocument {
    /// Partition numbers in layout order.
    pub fn numbers(&self) -> Vec<u32> {
        self.partitions
            .iter()
            .filter_map(|p| p.num.number())
            .collect()
    }

    pub fn partition(&self, num: u32) -> LayoutResult<&Partition> {
        self.partitions
            .iter()
            .find(|p| p.num == PartitionNum::Numbered(num))
            .ok_or_else(|| {
                LayoutError::PartitionNotFound(format!("partition {num} in layout {}", self.name))
            })
    }

    pub fn partition_by_label(&self, label: &str) -> LayoutResult<&Partition> {
        self.partitions
            .iter()
            .find(|p| p.label.as_deref() == Some(label))
            .ok_or_else(|| {
                LayoutError::PartitionNotFound(format!("label {label} in layout {}", self.name))
            })
    }

    pub fn partition_by_label_mut(&mut self, label: &str) -> LayoutResult<&mut Partition> {
        let name = &self.name;
        self.partitions
            .iter_mut()
            .find(|p| p.label.as_deref() == Some(label))
            .ok_or_else(|| {
                LayoutError::PartitionNotFound(format!("label {label} in layout {name}"))
            })
    }

    /// Fixed-width listing of every partition, for humans.
    pub fn dump(&self) -> LayoutDump<'_> {
        LayoutDump(self)
    }
}

/// Table rendering of a [`LayoutDocument`].
pub struct LayoutDump<'a>(&'a LayoutDocument);

fn clip(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn human_size(bytes: u64) -> String {
    i64::try_from(bytes)
        .map(produce_human_number)
        .unwrap_or_else(|_| bytes.to_string())
}

impl core::fmt::Display for LayoutDump<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let doc = self.0;
        writeln!(f, "\n  Layout '{}'", doc.name)?;
        writeln!(
            f,
            "  ┌──────┬──────────────────────────┬──────────┬────────────┬────────────┬────────────────────────┐"
        )?;
        writeln!(
            f,
            "  | Num  | Label                    | Type     | Size       | FS size    | Features               |"
        )?;
        writeln!(
            f,
            "  ├──────┼──────────────────────────┼──────────┼────────────┼────────────┼────────────────────────┤"
        )?;
        for p in &doc.partitions {
            let fs_size = p
                .fs_bytes
                .map(human_size)
                .unwrap_or_else(|| "-".into());
            writeln!(
                f,
                "  | {n:>4} | {l:<24} | {t:<8} | {s:>10} | {fs:>10} | {feat:<22} |",
                n = p.num.to_string(),
                l = clip(p.label.as_deref().unwrap_or(""), 24),
                t = clip(p.kind.as_str(), 8),
                s = human_size(p.bytes),
                fs = fs_size,
                feat = p.features.names().join(","),
            )?;
        }
        writeln!(
            f,
            "  └──────┴──────────────────────────┴──────────┴────────────┴────────────┴────────────────────────┘"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> LayoutDocument {
        let part = |num, label: &str, kind, bytes| Partition {
            num,
            label: Some(label.to_string()),
            kind,
            bytes,
            fs_bytes: None,
            fs_blocks: None,
            format: None,
            fs_format: None,
            fs_options: String::new(),
            uuid: None,
            features: Features::empty(),
            reserved_erase_blocks: None,
        };
        let mut state = part(PartitionNum::Numbered(1), "STATE", PartitionType::Data, 1 << 30);
        state.features = Features::EXPAND;
        LayoutDocument {
            name: "base".into(),
            metadata: LayoutMetadata {
                block_size: Some(512),
                fs_block_size: 4096,
                fs_align: 4096,
                primary_entry_array_padding_bytes: 0,
            },
            device: DeviceInfo::default(),
            partitions: vec![
                part(PartitionNum::Gap, "", PartitionType::Blank, 4096),
                part(PartitionNum::Numbered(3), "ROOT-A", PartitionType::Rootfs, 2 << 30),
                state,
            ],
        }
    }

    #[test]
    fn lookups() {
        let doc = doc();
        assert_eq!(doc.numbers(), vec![3, 1]);
        assert_eq!(doc.partition(3).unwrap().label.as_deref(), Some("ROOT-A"));
        assert_eq!(doc.partition_by_label("STATE").unwrap().bytes, 1 << 30);
        assert!(matches!(
            doc.partition(7),
            Err(LayoutError::PartitionNotFound(_))
        ));
        assert!(matches!(
            doc.partition_by_label("OEM"),
            Err(LayoutError::PartitionNotFound(_))
        ));
    }

    #[test]
    fn dump_lists_every_row() {
        let text = doc().dump().to_string();
        assert!(text.contains("ROOT-A"));
        assert!(text.contains("2GiB"));
        assert!(text.contains("expand"));
        assert_eq!(text.lines().filter(|l| l.starts_with("  | ")).count(), 4);
    }

    #[test]
    fn dump_prints_sizes_beyond_signed_range() {
        let mut doc = doc();
        doc.partitions[2].bytes = u64::MAX;
        let text = doc.dump().to_string();
        assert!(text.contains("18446744073709551615"));
        assert!(!text.contains("-1 "));
    }
}
