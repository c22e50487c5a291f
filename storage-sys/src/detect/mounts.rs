// SPDX-License-Identifier: GPL-3.0-only

use crate::{Result, SysError};

/// A mounted block device from `/proc/self/mountinfo`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountedFs {
    pub source: String,
    pub mount_point: String,
    pub fs_type: String,
}

/// Parse mountinfo, keeping only mounts backed by a `/dev` node
pub fn parse_mountinfo(input: &str) -> Result<Vec<MountedFs>> {
    let mut mounts = Vec::new();

    for line in input.lines().filter(|line| !line.trim().is_empty()) {
        let invalid = || SysError::parse("mountinfo line", line);
        let (left, right) = line.split_once(" - ").ok_or_else(invalid)?;

        let mount_point = left.split_whitespace().nth(4).ok_or_else(invalid)?;

        let mut right_fields = right.split_whitespace();
        let fs_type = right_fields.next().ok_or_else(invalid)?;
        let source = right_fields.next().ok_or_else(invalid)?;

        if !source.starts_with("/dev/") {
            continue;
        }

        mounts.push(MountedFs {
            source: unescape_mount_field(source),
            mount_point: unescape_mount_field(mount_point),
            fs_type: fs_type.to_string(),
        });
    }

    Ok(mounts)
}

fn unescape_mount_field(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    let bytes = value.as_bytes();
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'\\'
            && index + 3 < bytes.len()
            && bytes[index + 1].is_ascii_digit()
            && bytes[index + 2].is_ascii_digit()
            && bytes[index + 3].is_ascii_digit()
        {
            let octal = &value[index + 1..index + 4];
            if let Ok(num) = u8::from_str_radix(octal, 8) {
                output.push(num as char);
                index += 4;
                continue;
            }
        }

        output.push(bytes[index] as char);
        index += 1;
    }

    output
}
