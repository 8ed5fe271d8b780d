//! Size string parsing and display helpers

use crate::{Error, Result};

const KB: u64 = 1024;
const MB: u64 = KB * 1024;
const GB: u64 = MB * 1024;
const TB: u64 = GB * 1024;

/// Parse a size string like "512M", "4G", "1T" into bytes (binary units)
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::InvalidConfig("empty size string".to_string()));
    }

    let split_pos = s
        .char_indices()
        .find(|(_, c)| c.is_alphabetic())
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    let (num_str, suffix) = (s[..split_pos].trim(), s[split_pos..].trim());

    let num: u64 = num_str
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("invalid size '{}'", s)))?;

    let multiplier = match suffix.to_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => KB,
        "M" | "MB" | "MIB" => MB,
        "G" | "GB" | "GIB" => GB,
        "T" | "TB" | "TIB" => TB,
        _ => return Err(Error::InvalidConfig(format!("unknown size suffix in '{}'", s))),
    };

    num.checked_mul(multiplier)
        .ok_or_else(|| Error::InvalidConfig(format!("size '{}' is too large", s)))
}

/// Format bytes as a human-readable size
pub fn format_size(bytes: u64) -> String {
    let (unit, name) = if bytes >= TB {
        (TB, "TB")
    } else if bytes >= GB {
        (GB, "GB")
    } else if bytes >= MB {
        (MB, "MB")
    } else if bytes >= KB {
        (KB, "KB")
    } else {
        return format!("{} B", bytes);
    };

    if bytes % unit == 0 {
        format!("{} {}", bytes / unit, name)
    } else {
        format!("{:.1} {}", bytes as f64 / unit as f64, name)
    }
}
