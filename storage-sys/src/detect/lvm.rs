use storage_types::{LogicalVolume, PhysicalVolume, Volume, VolumeGroup};
use tracing::debug;

use super::lsblk::{LsblkDevice, flatten, volume_for};
use crate::process::{ToolCommand, ToolRunner};
use crate::{Result, SysError};

#[derive(Debug, Clone)]
struct VgRow {
    name: String,
    pe_size_k: u64,
    lvm1: bool,
}

#[derive(Debug, Clone)]
struct PvRow {
    pv_name: String,
    vg_name: Option<String>,
    pe_count: u64,
}

#[derive(Debug, Clone)]
struct LvRow {
    vg_name: String,
    lv_name: String,
    lv_path: String,
    size_k: u64,
    stripes: u32,
}

fn parse_tabbed_line(line: &str) -> Vec<String> {
    line.split('\t')
        .map(|part| part.trim().to_string())
        .collect()
}

// `--units k --nosuffix` still prints two decimals
fn parse_kib(value: &str) -> Option<u64> {
    value.parse::<f64>().ok().map(|v| v as u64)
}

fn rows<T>(output: &str, min_cols: usize, row: impl Fn(Vec<String>) -> Option<T>) -> Vec<T> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let cols = parse_tabbed_line(line);
            if cols.len() < min_cols {
                return None;
            }
            row(cols)
        })
        .collect()
}

fn parse_vgs(output: &str) -> Vec<VgRow> {
    rows(output, 3, |cols| {
        Some(VgRow {
            name: cols[0].clone(),
            pe_size_k: parse_kib(&cols[1])?,
            lvm1: cols[2] == "lvm1",
        })
    })
}

fn parse_pvs(output: &str) -> Vec<PvRow> {
    rows(output, 3, |cols| {
        let vg_name = if cols[1].is_empty() {
            None
        } else {
            Some(cols[1].clone())
        };
        Some(PvRow {
            pv_name: cols[0].clone(),
            vg_name,
            pe_count: cols[2].parse().ok()?,
        })
    })
}

fn parse_lvs(output: &str) -> Vec<LvRow> {
    let mut lvs: Vec<LvRow> = rows(output, 5, |cols| {
        Some(LvRow {
            vg_name: cols[0].clone(),
            lv_name: cols[1].clone(),
            lv_path: cols[2].clone(),
            size_k: parse_kib(&cols[3])?,
            stripes: cols[4].parse().unwrap_or(1),
        })
    });
    // One row per segment; keep the first
    let mut seen = std::collections::HashSet::new();
    lvs.retain(|lv| seen.insert((lv.vg_name.clone(), lv.lv_name.clone())));
    lvs
}

/// Device-mapper name of a logical volume; dashes in names are doubled
pub fn lvm_mapper_name(vg: &str, lv: &str) -> String {
    format!("{}-{}", vg.replace('-', "--"), lv.replace('-', "--"))
}

fn report(runner: &mut dyn ToolRunner, program: &str, columns: &str) -> Result<String> {
    let command = ToolCommand::new(program).args([
        "--noheadings",
        "--units",
        "k",
        "--nosuffix",
        "-o",
        columns,
        "--separator",
        "\t",
    ]);
    let output = runner.capture(&command)?;
    if !output.success() {
        return Err(SysError::OperationFailed(format!(
            "{program} failed: {}",
            output.stderr_text()
        )));
    }
    Ok(output.stdout_text())
}

pub(super) fn detect_volume_groups(
    runner: &mut dyn ToolRunner,
    devices: &[LsblkDevice],
) -> Result<Vec<VolumeGroup>> {
    if !cfg!(feature = "lvm-tools") {
        return Ok(Vec::new());
    }

    let vgs = match report(runner, "vgs", "vg_name,vg_extent_size,vg_fmt") {
        Ok(output) => output,
        Err(SysError::ToolNotFound(_)) => {
            debug!("LVM tools not installed; skipping volume groups");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };
    let pvs = report(runner, "pvs", "pv_name,vg_name,pv_pe_count")?;
    let lvs = report(runner, "lvs", "vg_name,lv_name,lv_path,lv_size,stripes")?;

    Ok(volume_groups_from_reports(&vgs, &pvs, &lvs, devices))
}

/// Assemble volume groups from `vgs`, `pvs` and `lvs` reports. Logical
/// volume filesystems come from the matching `lsblk` device.
pub fn volume_groups_from_reports(
    vgs: &str,
    pvs: &str,
    lvs: &str,
    devices: &[LsblkDevice],
) -> Vec<VolumeGroup> {
    let all = flatten(devices);
    let pvs = parse_pvs(pvs);
    let lvs = parse_lvs(lvs);

    parse_vgs(vgs)
        .into_iter()
        .map(|vg| {
            let physical_volumes = pvs
                .iter()
                .filter(|pv| pv.vg_name.as_deref() == Some(vg.name.as_str()))
                .map(|pv| PhysicalVolume {
                    device: pv.pv_name.clone(),
                    pe_count: pv.pe_count,
                })
                .collect();
            let logical_volumes = lvs
                .iter()
                .filter(|lv| lv.vg_name == vg.name)
                .map(|lv| {
                    let mapper = lvm_mapper_name(&lv.vg_name, &lv.lv_name);
                    let volume = all
                        .iter()
                        .find(|d| d.kind == "lvm" && d.name == mapper)
                        .map(|d| volume_for(d))
                        .unwrap_or_default();
                    LogicalVolume {
                        name: lv.lv_name.clone(),
                        vg_name: lv.vg_name.clone(),
                        device: lv.lv_path.clone(),
                        extents: lv.size_k / vg.pe_size_k.max(1),
                        stripes: lv.stripes.max(1),
                        volume: Volume {
                            size_k: lv.size_k,
                            ..volume
                        },
                    }
                })
                .collect();
            VolumeGroup {
                name: vg.name,
                pe_size_k: vg.pe_size_k,
                lvm1: vg.lvm1,
                physical_volumes,
                logical_volumes,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lvm_outputs() {
        let vgs = parse_vgs("  system\t4096.00\tlvm2\n");
        let pvs = parse_pvs("/dev/sda2\tsystem\t2000\n/dev/sdb1\t\t500\n");
        let lvs = parse_lvs(
            "system\troot\t/dev/system/root\t409600.00\t1\nsystem\troot\t/dev/system/root\t409600.00\t1\n",
        );

        assert_eq!(vgs[0].pe_size_k, 4096);
        assert!(!vgs[0].lvm1);
        assert_eq!(pvs.len(), 2);
        assert_eq!(pvs[1].vg_name, None);
        assert_eq!(lvs.len(), 1);
    }

    #[test]
    fn builds_volume_groups_from_reports() {
        let groups = volume_groups_from_reports(
            "data\t4096.00\tlvm2\n",
            "/dev/sdb1\tdata\t250\n/dev/sdc1\t\t250\n",
            "data\tmy-lv\t/dev/data/my-lv\t40960.00\t1\n",
            &[],
        );
        assert_eq!(groups.len(), 1);
        let vg = &groups[0];
        assert_eq!(vg.physical_volumes.len(), 1);
        assert_eq!(vg.logical_volumes[0].extents, 10);
        assert_eq!(vg.logical_volumes[0].volume.size_k, 40960);
        assert_eq!(lvm_mapper_name("data", "my-lv"), "data-my--lv");
    }
}
