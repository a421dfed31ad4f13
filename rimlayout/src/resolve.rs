// SPDX-License-Identifier: MIT

use std::path::{Path, PathBuf};

use crate::config::{COMMON_LAYOUT, LayoutConfig};
use crate::error::*;
use crate::merge::apply_layout_overrides;
use crate::source::ConfigSource;

/// Loads `name` from `source` and merges its whole parent chain into it.
pub fn load_stacked_config<S: ConfigSource + ?Sized>(
    source: &S,
    name: &str,
) -> LayoutResult<LayoutConfig> {
    let loaded = source.load(name, None)?;
    resolve_config(source, loaded.config, Some(&loaded.origin))
}

/// Merges the parent chain of an already parsed document.
///
/// Parents are looked up through `source`, relative to `origin`.
pub fn resolve_config<S: ConfigSource + ?Sized>(
    source: &S,
    config: LayoutConfig,
    origin: Option<&Path>,
) -> LayoutResult<LayoutConfig> {
    let mut chain = Vec::new();
    resolve_stacked(source, config, origin, &mut chain)
}

fn resolve_stacked<S: ConfigSource + ?Sized>(
    source: &S,
    mut config: LayoutConfig,
    origin: Option<&Path>,
    chain: &mut Vec<PathBuf>,
) -> LayoutResult<LayoutConfig> {
    if let Some(origin) = origin {
        if chain.iter().any(|seen| seen == origin) {
            return Err(LayoutError::InvalidLayout(format!(
                "{} is its own parent",
                origin.display()
            )));
        }
        chain.push(origin.to_path_buf());
    }

    expand_common(&mut config)?;

    // Parents are stacked last-listed first, so the first listed parent ends
    // up on top of the others. The document itself goes on top of them all.
    let mut stacked: Option<LayoutConfig> = None;
    for parent_name in config.parents().iter().rev() {
        let loaded = source.load(parent_name, origin)?;
        log::debug!("stacking parent {}", loaded.origin.display());
        let parent = resolve_stacked(source, loaded.config, Some(&loaded.origin), chain)?;
        stacked = Some(match stacked {
            None => parent,
            Some(mut below) => {
                overlay_child(&mut below, &parent)?;
                below
            }
        });
    }
    if let Some(mut base) = stacked {
        overlay_child(&mut base, &config)?;
        config = base;
    }

    if origin.is_some() {
        chain.pop();
    }
    config.parent = None;
    Ok(config)
}

/// Rebuilds every named layout on top of the document's own `common` layout.
fn expand_common(config: &mut LayoutConfig) -> LayoutResult<()> {
    let common = config
        .layouts
        .entry(COMMON_LAYOUT.to_string())
        .or_default()
        .clone();

    for (name, layout) in config.layouts.iter_mut() {
        if name == COMMON_LAYOUT {
            continue;
        }
        let mut expanded = common.clone();
        apply_layout_overrides(&mut expanded, layout)?;
        *layout = expanded;
    }
    Ok(())
}

/// Applies an expanded child document on top of its resolved parent.
fn overlay_child(parent: &mut LayoutConfig, child: &LayoutConfig) -> LayoutResult<()> {
    parent.metadata.overlay(&child.metadata);
    if parent.comment.is_none() {
        parent.comment = child.comment.clone();
    }

    let parent_common = parent
        .layouts
        .entry(COMMON_LAYOUT.to_string())
        .or_default()
        .clone();
    for name in child.layouts.keys() {
        parent
            .layouts
            .entry(name.clone())
            .or_insert_with(|| parent_common.clone());
    }

    let child_common = child
        .layouts
        .get(COMMON_LAYOUT)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for (name, layout) in parent.layouts.iter_mut() {
        if name != COMMON_LAYOUT {
            apply_layout_overrides(layout, child_common)?;
        }
        if let Some(child_layout) = child.layouts.get(name) {
            apply_layout_overrides(layout, child_layout)?;
        }
    }
    Ok(())
}
