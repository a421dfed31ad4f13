// SPDX-License-Identifier: MIT

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::*;
use crate::number::SizeSpec;
use crate::partition::PartitionNum;

/// Name of the layout every other layout of a document is built on.
pub const COMMON_LAYOUT: &str = "common";
/// Name of the layout every document must resolve.
pub const BASE_LAYOUT: &str = "base";

/// A whole layout document, before parents and `common` are merged in.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayoutConfig {
    /// Space separated names of the parent documents.
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub metadata: RawMetadata,
    #[serde(default)]
    pub layouts: BTreeMap<String, Vec<RawPartition>>,
    #[serde(default, rename = "_comment")]
    pub comment: Option<Value>,
}

impl LayoutConfig {
    /// Reads an already parsed document tree.
    pub fn from_value(value: Value) -> LayoutResult<Self> {
        serde_json::from_value(value)
            .map_err(|e| LayoutError::InvalidLayout(format!("malformed layout document: {e}")))
    }

    /// Parses JSON text, ignoring lines that start with `#`.
    pub fn from_json_str(text: &str) -> LayoutResult<Self> {
        serde_json::from_str(&strip_comment_lines(text))
            .map_err(|e| LayoutError::InvalidLayout(format!("malformed layout document: {e}")))
    }

    pub fn from_toml_str(text: &str) -> LayoutResult<Self> {
        toml::from_str(text)
            .map_err(|e| LayoutError::InvalidLayout(format!("malformed layout document: {e}")))
    }

    /// Parent names in the order they are listed.
    pub fn parents(&self) -> Vec<String> {
        self.parent
            .as_deref()
            .unwrap_or("")
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }
}

fn strip_comment_lines(text: &str) -> String {
    text.lines()
        .map(|line| {
            if line.trim_start().starts_with('#') {
                ""
            } else {
                line
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Per-format filesystem options, or one string for every format.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FsOptions {
    Fixed(String),
    PerFormat(BTreeMap<String, Value>),
}

/// Overwrites every field of `$dst` that `$src` sets.
macro_rules! overlay_fields {
    ($dst:expr, $src:expr, $($field:ident),+ $(,)?) => {
        $(
            if $src.$field.is_some() {
                $dst.$field = $src.$field.clone();
            }
        )+
    };
}

/// Device-wide constants of a document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawMetadata {
    pub block_size: Option<SizeSpec>,
    pub fs_block_size: Option<SizeSpec>,
    pub fs_align: Option<SizeSpec>,
    pub primary_entry_array_padding_bytes: Option<SizeSpec>,
    #[serde(rename = "_comment")]
    pub comment: Option<Value>,
}

impl RawMetadata {
    /// Field-wise union, `other` wins.
    pub fn overlay(&mut self, other: &RawMetadata) {
        overlay_fields!(
            self,
            other,
            block_size,
            fs_block_size,
            fs_align,
            primary_entry_array_padding_bytes,
            comment,
        );
    }
}

/// One partition row as written in a document. Every field is optional until
/// the normalizer checks what each kind of row requires.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawPartition {
    #[serde(default)]
    pub num: PartitionNum,
    pub label: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub size: Option<SizeSpec>,
    pub size_min: Option<SizeSpec>,
    pub fs_size: Option<SizeSpec>,
    pub fs_size_min: Option<SizeSpec>,
    pub fs_blocks: Option<SizeSpec>,
    pub bytes: Option<u64>,
    pub format: Option<String>,
    pub fs_format: Option<String>,
    pub fs_options: Option<FsOptions>,
    pub uuid: Option<String>,
    pub features: Option<Vec<String>>,
    pub erase_block_size: Option<SizeSpec>,
    pub page_size: Option<SizeSpec>,
    pub max_bad_erase_blocks: Option<u64>,
    pub reserved_erase_blocks: Option<u64>,
    pub hybrid_mbr: Option<bool>,
    pub external_gpt: Option<bool>,
    #[serde(rename = "_comment")]
    pub comment: Option<Value>,
}

impl RawPartition {
    /// Field-wise merge: every field set in `other` replaces ours. `num` is the
    /// merge key and never changes.
    pub fn overlay(&mut self, other: &RawPartition) {
        overlay_fields!(
            self,
            other,
            label,
            kind,
            size,
            size_min,
            fs_size,
            fs_size_min,
            fs_blocks,
            bytes,
            format,
            fs_format,
            fs_options,
            uuid,
            features,
            erase_block_size,
            page_size,
            max_bad_erase_blocks,
            reserved_erase_blocks,
            hybrid_mbr,
            external_gpt,
            comment,
        );
    }

    pub fn describe(&self) -> String {
        match &self.label {
            Some(label) => format!("{label} (#{})", self.num),
            None => format!("#{}", self.num),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_document_with_comment_lines() {
        let text = r#"
            # Layout for tests.
            {
              "parent": "common.json  legacy.json",
              "metadata": { "block_size": 512, "fs_block_size": "4KiB" },
              "layouts": {
                # The base image.
                "base": [ { "num": 1, "label": "STATE", "type": "data", "size": "1GiB" } ]
              }
            }
        "#;
        let config = LayoutConfig::from_json_str(text).unwrap();
        assert_eq!(config.parents(), vec!["common.json", "legacy.json"]);
        assert_eq!(config.layouts["base"][0].num, PartitionNum::Numbered(1));
        assert_eq!(
            config.metadata.fs_block_size.as_ref().unwrap().bytes().unwrap(),
            4096
        );
    }

    #[test]
    fn parses_toml_document() {
        let text = r#"
            [metadata]
            fs_block_size = 4096

            [[layouts.base]]
            num = 3
            label = "ROOT-A"
            type = "rootfs"
            size = "2GiB"
        "#;
        let config = LayoutConfig::from_toml_str(text).unwrap();
        assert_eq!(config.layouts["base"][0].kind.as_deref(), Some("rootfs"));
    }

    #[test]
    fn rejects_unknown_keys() {
        let top = LayoutConfig::from_value(json!({ "layouts": {}, "flavor": 1 }));
        assert!(matches!(top, Err(LayoutError::InvalidLayout(_))));

        let part = LayoutConfig::from_value(json!({
            "layouts": { "base": [ { "num": 1, "lable": "typo" } ] }
        }));
        assert!(matches!(part, Err(LayoutError::InvalidLayout(_))));

        let meta = LayoutConfig::from_value(json!({ "metadata": { "sector": 512 } }));
        assert!(matches!(meta, Err(LayoutError::InvalidLayout(_))));
    }

    #[test]
    fn fs_options_shapes() {
        let fixed: FsOptions = serde_json::from_value(json!("-O ^has_journal")).unwrap();
        assert_eq!(fixed, FsOptions::Fixed("-O ^has_journal".into()));
        let per: FsOptions =
            serde_json::from_value(json!({ "ext4": "-i 8192", "squashfs": "-b 1M" })).unwrap();
        assert!(matches!(per, FsOptions::PerFormat(map) if map.len() == 2));
    }

    #[test]
    fn overlay_replaces_only_set_fields() {
        let mut base = RawPartition {
            num: PartitionNum::Numbered(1),
            label: Some("STATE".into()),
            size: Some("1GiB".into()),
            features: Some(vec!["expand".into()]),
            ..RawPartition::default()
        };
        let child = RawPartition {
            num: PartitionNum::Numbered(1),
            size: Some("2GiB".into()),
            ..RawPartition::default()
        };
        base.overlay(&child);
        assert_eq!(base.label.as_deref(), Some("STATE"));
        assert_eq!(base.size, Some(SizeSpec::from("2GiB")));
        assert_eq!(base.features, Some(vec!["expand".to_string()]));
    }
}
