//! Codec for Allwinner `sys_partition.fex` partition tables.
//!
//! The file is INI-like: an `[mbr]` section with a `size` key, a
//! `[partition_start]` marker, then one `[partition]` section per partition.
//! Sizes are in sectors; numbers accept a `0x` prefix.

use std::fs;
use std::path::Path;

use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub name: String,
    /// Size in sectors.
    pub size: u64,
    pub downloadfile: String,
    pub user_type: u32,
    pub keydata: bool,
    pub encrypt: bool,
    pub verify: bool,
    pub ro: bool,
}

#[derive(Debug, Default)]
pub struct PartitionTable {
    mbr_size: u32,
    partitions: Vec<Partition>,
}

impl PartitionTable {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<PartitionTable> {
        let text = fs::read_to_string(path)?;
        Self::parse_str(&text)
    }

    pub fn parse_from_data(data: &[u8]) -> Result<PartitionTable> {
        if data.is_empty() {
            return Err(Error::Parse("empty partition table".into()));
        }
        Self::parse_str(&String::from_utf8_lossy(data))
    }

    pub fn parse_str(text: &str) -> Result<PartitionTable> {
        let mut table = PartitionTable::default();
        let mut in_mbr = false;
        let mut in_partition = false;
        let mut current = Partition::default();

        for raw in text.lines() {
            let line = raw.trim_matches([' ', '\t', '\r']);
            if line.is_empty() || line.starts_with(';') || line.starts_with("//") {
                continue;
            }

            if line == "[partition_start]" {
                in_partition = true;
                in_mbr = false;
                continue;
            }
            if line == "[mbr]" {
                in_mbr = true;
                in_partition = false;
                continue;
            }
            if line == "[partition]" {
                in_mbr = false;
                // A new header commits the partition being built.
                if !current.name.is_empty() {
                    table.partitions.push(std::mem::take(&mut current));
                }
                current = Partition::default();
                in_partition = true;
                continue;
            }

            if in_mbr {
                let mut rest = line;
                if let Some(stripped) = rest.strip_prefix("size") {
                    rest = stripped.trim_start_matches([' ', '\t']);
                    if let Some(stripped) = rest.strip_prefix('=') {
                        table.mbr_size = parse_number(stripped.trim_start_matches([' ', '\t'])) as u32;
                    }
                }
            }

            if in_partition && !current.name.is_empty() {
                parse_partition_line(line, &mut current);
            }

            // The first key of a fresh partition must be its name.
            if in_partition && current.name.is_empty() && line.contains("name") {
                parse_partition_line(line, &mut current);
            }
        }

        if in_partition && !current.name.is_empty() {
            table.partitions.push(current);
        }

        Ok(table)
    }

    pub fn mbr_size(&self) -> u32 {
        self.mbr_size
    }

    pub fn all(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn by_name(&self, name: &str) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.name == name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.by_name(name).is_some()
    }

    /// Fixed-width table dump: Name(20) Size(20) DownloadFile(35)
    /// UserType(10) Flags.
    pub fn dump_to_string(&self) -> String {
        let separator = "-".repeat(104);
        let mut out = String::new();
        out.push_str("\nPartition details:\n");
        out.push_str(&separator);
        out.push('\n');
        out.push_str(&format!(
            "{:<20}{:<20}{:<35}{:<10}Flags\n",
            "Name", "Size", "Download File", "User Type"
        ));
        out.push_str(&separator);
        out.push('\n');

        for partition in &self.partitions {
            let downloadfile = if partition.downloadfile.is_empty() {
                "-"
            } else {
                &partition.downloadfile
            };

            let mut flags = String::new();
            if partition.keydata {
                flags.push('K');
            }
            if partition.encrypt {
                flags.push('E');
            }
            if partition.verify {
                flags.push('V');
            }
            if partition.ro {
                flags.push('R');
            }
            if flags.is_empty() {
                flags.push('-');
            }

            out.push_str(&format!(
                "{:<20}{:<20}{:<35}{:<10}{}\n",
                partition.name,
                partition.size,
                downloadfile,
                format!("0x{:04x}", partition.user_type),
                flags
            ));
        }

        out.push_str("\nFlags: K=KeyData, E=Encrypt, V=Verify, R=Read-Only\n");
        out
    }

    pub fn dump_to_json(&self) -> String {
        let mut out = String::new();
        out.push_str("{\n");
        out.push_str(&format!("    \"mbr_size\": {},\n", self.mbr_size));
        out.push_str("    \"partitions\": [\n");

        for (i, partition) in self.partitions.iter().enumerate() {
            out.push_str("        {\n");
            out.push_str(&format!(
                "            \"name\": \"{}\",\n",
                json_escape(&partition.name)
            ));
            out.push_str(&format!("            \"size\": {},\n", partition.size));
            out.push_str(&format!(
                "            \"downloadfile\": \"{}\",\n",
                json_escape(&partition.downloadfile)
            ));
            out.push_str(&format!(
                "            \"user_type\": {},\n",
                partition.user_type
            ));
            out.push_str(&format!("            \"keydata\": {},\n", partition.keydata));
            out.push_str(&format!("            \"encrypt\": {},\n", partition.encrypt));
            out.push_str(&format!("            \"verify\": {},\n", partition.verify));
            out.push_str(&format!("            \"ro\": {}\n", partition.ro));
            out.push_str("        }");
            if i + 1 < self.partitions.len() {
                out.push(',');
            }
            out.push('\n');
        }

        out.push_str("    ]\n");
        out.push_str("}\n");
        out
    }
}

fn json_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out
}

fn parse_partition_line(line: &str, partition: &mut Partition) -> bool {
    let mut rest = line.trim_start_matches([' ', '\t']);
    let key = take_identifier(&mut rest);
    if key.is_empty() {
        return false;
    }

    rest = rest.trim_start_matches([' ', '\t']);
    let Some(stripped) = rest.strip_prefix('=') else {
        return false;
    };
    rest = stripped.trim_start_matches([' ', '\t']);
    if rest.is_empty() {
        return false;
    }

    match key.as_str() {
        "name" => partition.name = take_identifier(&mut rest),
        "size" => partition.size = parse_number(rest),
        "downloadfile" => {
            partition.downloadfile = if rest.starts_with('"') {
                take_quoted(&mut rest)
            } else {
                take_identifier(&mut rest)
            }
        }
        "user_type" => partition.user_type = parse_number(rest) as u32,
        "keydata" => partition.keydata = parse_number(rest) != 0,
        "encrypt" => partition.encrypt = parse_number(rest) != 0,
        "verify" => partition.verify = parse_number(rest) != 0,
        "ro" => partition.ro = parse_number(rest) != 0,
        _ => {}
    }

    true
}

/// Identifiers here admit path-ish characters so bare download file names
/// like `boot-resource.fex` scan as one token.
fn take_identifier(rest: &mut &str) -> String {
    let end = rest
        .find(|c: char| {
            !(c.is_ascii_alphanumeric()
                || matches!(c, '_' | '-' | '.' | '/' | '\\' | ':' | '#' | '(' | ')'))
        })
        .unwrap_or(rest.len());
    let ident = rest[..end].to_string();
    *rest = &rest[end..];
    ident
}

fn take_quoted(rest: &mut &str) -> String {
    let mut chars = rest.char_indices();
    chars.next(); // opening quote

    let mut result = String::new();
    let mut consumed = rest.len();
    while let Some((i, c)) = chars.next() {
        if c == '\\' {
            if let Some((_, escaped)) = chars.next() {
                result.push(escaped);
            }
            continue;
        }
        if c == '"' {
            consumed = i + 1;
            break;
        }
        result.push(c);
    }

    *rest = &rest[consumed..];
    result
}

/// Leading-number scan; accepts decimal and `0x` hex, stops at the first
/// non-digit.
fn parse_number(s: &str) -> u64 {
    let b = s.as_bytes();
    let (radix, start) = if b.starts_with(b"0x") || b.starts_with(b"0X") {
        (16u64, 2)
    } else {
        (10u64, 0)
    };

    let mut value = 0u64;
    let mut end = start;
    while end < b.len() {
        match (b[end] as char).to_digit(radix as u32) {
            Some(d) => {
                value = value.wrapping_mul(radix).wrapping_add(d as u64);
                end += 1;
            }
            None => break,
        }
    }
    value
}
