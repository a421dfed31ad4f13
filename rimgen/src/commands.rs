// SPDX-License-Identifier: MIT

use std::path::{Path, PathBuf};

use anyhow::{Context as _, bail};
use colored::Colorize;
use rimlayout::{Adjustment, FsSource, PartitionTable, parse_human_number};

use crate::Field;
use crate::utils::pretty_bytes;
use crate::{log_info, log_verbose};

/// Options shared by every layout command.
pub struct Context {
    pub adjust_part: String,
    pub fallback_dir: Option<PathBuf>,
}

impl Context {
    fn load(&self, layout: &Path) -> anyhow::Result<PartitionTable> {
        let adjustments = Adjustment::parse_list(&self.adjust_part)?;
        let mut source = FsSource::new();
        if let Some(dir) = &self.fallback_dir {
            source = source.with_fallback_dir(dir);
        }
        log_verbose!("Loading layout {}", layout.display());
        for adjustment in &adjustments {
            log_verbose!("Adjustment {adjustment}");
        }
        PartitionTable::from_source(&source, &layout.to_string_lossy(), &adjustments)
            .with_context(|| format!("cannot load layout {}", layout.display()))
    }
}

/// The requested image types, or all of them.
fn selected<'a>(table: &'a PartitionTable, image_types: &'a [String]) -> Vec<&'a str> {
    if image_types.is_empty() {
        table.image_types()
    } else {
        image_types.iter().map(String::as_str).collect()
    }
}

pub fn validate(ctx: &Context, layout: &Path, image_types: &[String]) -> anyhow::Result<()> {
    let table = ctx.load(layout)?;
    let mut failed = 0usize;
    for image_type in selected(&table, image_types) {
        match table.validate(image_type) {
            Ok(()) => log_info!("{} {image_type}", "valid".green()),
            Err(e) => {
                failed += 1;
                eprintln!("[rimgen] {} {image_type}: {e}", "invalid".red().bold());
            }
        }
    }
    if failed > 0 {
        bail!("{failed} image type(s) failed validation");
    }
    Ok(())
}

pub fn debug(ctx: &Context, layout: &Path, image_types: &[String]) -> anyhow::Result<()> {
    let table = ctx.load(layout)?;
    for image_type in selected(&table, image_types) {
        print!("{}", table.dump(image_type)?);
    }
    Ok(())
}

pub fn image_types(ctx: &Context, layout: &Path) -> anyhow::Result<()> {
    let table = ctx.load(layout)?;
    println!("{}", table.image_types().join(" "));
    Ok(())
}

pub fn partitions(ctx: &Context, layout: &Path, image_type: &str) -> anyhow::Result<()> {
    let table = ctx.load(layout)?;
    let nums: Vec<String> = table
        .partition_numbers(image_type)?
        .iter()
        .map(u32::to_string)
        .collect();
    println!("{}", nums.join(" "));
    Ok(())
}

pub fn totals(ctx: &Context, layout: &Path, image_type: &str) -> anyhow::Result<()> {
    let table = ctx.load(layout)?;
    let totals = table.table_totals(image_type)?;
    println!("expand_count: {}", totals.expand_count);
    println!("expand_min: {}", totals.expand_min);
    println!("last_partition_count: {}", totals.last_partition_count);
    println!("byte_count: {}", totals.byte_count);
    println!("fs_block_align_losses: {}", totals.fs_block_align_losses);
    println!("min_disk_size: {}", totals.min_disk_size);
    Ok(())
}

pub fn disk_size(ctx: &Context, layout: &Path, image_type: &str) -> anyhow::Result<()> {
    let table = ctx.load(layout)?;
    let min = table.table_totals(image_type)?.min_disk_size;
    log_verbose!("Minimum disk size for {image_type}: {}", pretty_bytes(min));
    println!("{min}");
    Ok(())
}

pub fn extents(
    ctx: &Context,
    layout: &Path,
    image_type: &str,
    disk_size: &str,
) -> anyhow::Result<()> {
    let disk_size = parse_human_number(disk_size)?;
    let disk_size = u64::try_from(disk_size)
        .with_context(|| format!("disk size {disk_size} is negative"))?;
    let table = ctx.load(layout)?;
    log_info!("{image_type} on a {} disk", pretty_bytes(disk_size));
    for extent in table.partition_extents(image_type, disk_size)? {
        println!(
            "{} {} {} {}",
            extent.num,
            extent.start,
            extent.bytes,
            extent.label.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

pub fn block_size(ctx: &Context, layout: &Path, fs: bool) -> anyhow::Result<()> {
    let table = ctx.load(layout)?;
    if fs {
        println!("{}", table.fs_block_size());
    } else {
        match table.block_size() {
            Some(size) => println!("{size}"),
            None => bail!("layout {} does not set block_size", layout.display()),
        }
    }
    Ok(())
}

pub fn read(
    ctx: &Context,
    field: Field,
    layout: &Path,
    image_type: &str,
    partition: &str,
) -> anyhow::Result<()> {
    let table = ctx.load(layout)?;
    let num = || -> anyhow::Result<u32> {
        partition
            .parse()
            .with_context(|| format!("{partition:?} is not a partition number"))
    };
    let value = match field {
        Field::Number => table.number(image_type, partition)?.to_string(),
        Field::PartSize => table.partition_size(image_type, num()?)?.to_string(),
        Field::FsSize => table.filesystem_size(image_type, num()?)?.to_string(),
        Field::FullSize => table.full_partition_size(image_type, num()?)?.to_string(),
        Field::Label => table.label(image_type, num()?)?.to_string(),
        Field::Type => table.partition_type(image_type, num()?)?.to_string(),
        Field::Format => table.format(image_type, num()?)?.to_string(),
        Field::FsFormat => table.filesystem_format(image_type, num()?)?.to_string(),
        Field::FsOptions => table.filesystem_options(image_type, num()?)?.to_string(),
        Field::Uuid => table.uuid(image_type, num()?)?.to_string(),
        Field::ReservedEraseBlocks => table
            .reserved_erase_blocks(image_type, num()?)?
            .to_string(),
    };
    println!("{value}");
    Ok(())
}

pub fn parse_size(size: &str) -> anyhow::Result<()> {
    println!("{}", parse_human_number(size)?);
    Ok(())
}
