// SPDX-License-Identifier: MIT

use bitflags::bitflags;
use serde::{Deserialize, Deserializer};

use crate::config::{FsOptions, RawPartition};
use crate::number::SizeSpec;

/// Identifier of a layout row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum PartitionNum {
    /// Anonymous filler row without a number.
    #[default]
    Gap,
    /// The device-wide metadata pseudo-partition.
    Metadata,
    Numbered(u32),
}

impl PartitionNum {
    pub fn is_gap(&self) -> bool {
        matches!(self, PartitionNum::Gap)
    }

    pub fn is_metadata(&self) -> bool {
        matches!(self, PartitionNum::Metadata)
    }

    pub fn number(&self) -> Option<u32> {
        match self {
            PartitionNum::Numbered(n) => Some(*n),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for PartitionNum {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct NumVisitor;

        impl<'de> serde::de::Visitor<'de> for NumVisitor {
            type Value = PartitionNum;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a positive partition number or \"metadata\"")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if value == "metadata" {
                    Ok(PartitionNum::Metadata)
                } else {
                    Err(E::invalid_value(serde::de::Unexpected::Str(value), &self))
                }
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match u32::try_from(value) {
                    Ok(n) if n > 0 => Ok(PartitionNum::Numbered(n)),
                    _ => Err(E::invalid_value(serde::de::Unexpected::Unsigned(value), &self)),
                }
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match u64::try_from(value) {
                    Ok(v) => self.visit_u64(v),
                    Err(_) => Err(E::invalid_value(serde::de::Unexpected::Signed(value), &self)),
                }
            }
        }

        deserializer.deserialize_any(NumVisitor)
    }
}

impl core::fmt::Display for PartitionNum {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PartitionNum::Gap => f.write_str("-"),
            PartitionNum::Metadata => f.write_str("metadata"),
            PartitionNum::Numbered(n) => write!(f, "{n}"),
        }
    }
}

/// Partition `type` as understood by the engine. Unknown types are carried
/// through untouched for the script emitter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PartitionType {
    Rootfs,
    Kernel,
    Efi,
    Data,
    Blank,
    Other(String),
}

impl PartitionType {
    pub fn parse(kind: &str) -> Self {
        match kind {
            "rootfs" => PartitionType::Rootfs,
            "kernel" => PartitionType::Kernel,
            "efi" => PartitionType::Efi,
            "data" => PartitionType::Data,
            "blank" => PartitionType::Blank,
            other => PartitionType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PartitionType::Rootfs => "rootfs",
            PartitionType::Kernel => "kernel",
            PartitionType::Efi => "efi",
            PartitionType::Data => "data",
            PartitionType::Blank => "blank",
            PartitionType::Other(kind) => kind,
        }
    }

    /// Data and rootfs partitions hold filesystems aligned to `fs_align`.
    pub fn holds_filesystem(&self) -> bool {
        matches!(self, PartitionType::Data | PartitionType::Rootfs)
    }
}

impl core::fmt::Display for PartitionType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Features: u8 {
        /// Absorbs all space not claimed by fixed-size partitions.
        const EXPAND = 1 << 0;
        /// Placed at the very end of the device, after the expand partition.
        const LAST_PARTITION = 1 << 1;
    }
}

impl Features {
    pub const NAMES: [(&'static str, Features); 2] = [
        ("expand", Features::EXPAND),
        ("last_partition", Features::LAST_PARTITION),
    ];

    pub fn from_feature_name(name: &str) -> Option<Self> {
        Self::NAMES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, flag)| *flag)
    }

    pub fn names(&self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(n, _)| *n)
            .collect()
    }
}

/// A normalized partition row, all sizes in bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub num: PartitionNum,
    pub label: Option<String>,
    pub kind: PartitionType,
    pub bytes: u64,
    pub fs_bytes: Option<u64>,
    pub fs_blocks: Option<u64>,
    pub format: Option<String>,
    pub fs_format: Option<String>,
    pub fs_options: String,
    pub uuid: Option<String>,
    pub features: Features,
    pub reserved_erase_blocks: Option<u64>,
}

impl Partition {
    pub fn label_or_default(&self) -> &str {
        self.label.as_deref().unwrap_or(crate::DEFAULT_LABEL)
    }

    pub fn is_expand(&self) -> bool {
        self.features.contains(Features::EXPAND)
    }

    pub fn is_last_partition(&self) -> bool {
        self.features.contains(Features::LAST_PARTITION)
    }

    pub fn is_ubi(&self) -> bool {
        self.format.as_deref() == Some("ubi")
    }

    /// Re-expresses the partition as a document row that normalizes back to `self`.
    pub fn to_raw(&self) -> RawPartition {
        RawPartition {
            num: self.num,
            label: self.label.clone(),
            kind: Some(self.kind.as_str().to_string()),
            size: Some(SizeSpec::from(self.bytes)),
            fs_size: match self.fs_blocks {
                Some(_) => None,
                None => self.fs_bytes.map(SizeSpec::from),
            },
            fs_blocks: self.fs_blocks.map(SizeSpec::from),
            format: self.format.clone(),
            fs_format: self.fs_format.clone(),
            fs_options: Some(FsOptions::Fixed(self.fs_options.clone())),
            uuid: self.uuid.clone(),
            features: Some(self.features.names().iter().map(|s| s.to_string()).collect()),
            reserved_erase_blocks: self.reserved_erase_blocks,
            ..RawPartition::default()
        }
    }
}

/// Device-wide values carried by the `metadata` pseudo-partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Total device capacity.
    pub bytes: Option<u64>,
    pub erase_block_size: Option<u64>,
    pub page_size: Option<u64>,
    pub max_bad_erase_blocks: Option<u64>,
    pub hybrid_mbr: bool,
    pub external_gpt: bool,
}

impl DeviceInfo {
    /// Raw flash layouts declare a non-zero erase block size.
    pub fn is_raw_flash(&self) -> bool {
        self.erase_block_size.unwrap_or(0) != 0
    }

    /// Erase block capacity left for data once UBI stores its two header pages.
    pub fn ubi_block_size(&self) -> Option<u64> {
        let erase_block_size = self.erase_block_size?;
        let page_size = self.page_size.unwrap_or(0);
        erase_block_size
            .checked_sub(2 * page_size)
            .filter(|size| *size > 0)
    }
}
