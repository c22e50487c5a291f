// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use storage_sys::{FstabFile, SystemToolRunner, detect, read_mountinfo};

#[derive(Debug, Parser)]
#[command(name = "storage-probe")]
#[command(about = "Detect disks, partitions and volume groups and print the device model")]
struct Args {
    /// Mount table to read persisted mount settings from
    #[arg(long, default_value = "/etc/fstab")]
    fstab: PathBuf,

    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut runner = SystemToolRunner::new();
    let table = FstabFile::new(&args.fstab, "/");
    let mountinfo = read_mountinfo().context("reading /proc/self/mountinfo")?;

    let model = detect(&mut runner, &table, &mountinfo)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&model)?);
    } else {
        print!("{}", toml::to_string(&model)?);
    }
    Ok(())
}
