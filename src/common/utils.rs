//! Utility functions for nomad

use chrono::{DateTime, Utc};

/// Current wall-clock time, as recorded on mutations and change records
pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now()
}

/// Host name of this machine, or "unknown" when it cannot be resolved
pub fn local_host() -> String {
    whoami::fallible::hostname().unwrap_or_else(|_| "unknown".into())
}

/// Name of the user running this process
pub fn local_user() -> String {
    whoami::username()
}

/// Join a list of displayable items with commas
pub fn join_display<T: std::fmt::Display>(items: impl IntoIterator<Item = T>) -> String {
    items
        .into_iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

/// Parse a size such as "512MB", "2GB" or a plain byte count
pub fn parse_size(s: &str) -> crate::Result<u64> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (num_str, unit) = s.split_at(split);
    let num: u64 = num_str
        .parse()
        .map_err(|_| crate::Error::InvalidConfig(format!("invalid size: {}", s)))?;
    let factor: u64 = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "KB" | "K" => 1 << 10,
        "MB" | "M" => 1 << 20,
        "GB" | "G" => 1 << 30,
        "TB" | "T" => 1 << 40,
        other => {
            return Err(crate::Error::InvalidConfig(format!(
                "unknown size unit: {}",
                other
            )))
        }
    };
    num.checked_mul(factor)
        .ok_or_else(|| crate::Error::InvalidConfig(format!("size overflows: {}", s)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536 * 1024 * 1024), "1.50 GB");
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert_eq!(parse_size("512MB").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_size("2g").unwrap(), 2 * 1024 * 1024 * 1024);
        assert!(parse_size("MB").is_err());
        assert!(parse_size("12XB").is_err());
    }

    #[test]
    fn test_join_display() {
        assert_eq!(join_display(["a", "b", "c"]), "a, b, c");
        assert_eq!(join_display(Vec::<String>::new()), "");
    }
}
