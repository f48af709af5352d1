use serde_json::Value;

pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;

    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Shortens an RFC 3339 timestamp to `YYYY-MM-DD HH:MM:SS` for display.
pub fn short_timestamp(raw: &str) -> String {
    if raw.len() >= 20 && raw.is_ascii() && raw.as_bytes()[10] == b'T' {
        format!("{} {}", &raw[..10], &raw[11..19])
    } else {
        raw.to_string()
    }
}

/// Renders one listing entry the way `ls -l` would.
pub fn entry_row(entry: &Value) -> String {
    let name = entry["name"].as_str().unwrap_or("?");
    let is_dir = entry["isDirectory"].as_bool().unwrap_or(false);
    let marker = if is_dir { "d" } else { "-" };
    let size = if is_dir {
        "-".to_string()
    } else {
        format_size(entry["size"].as_u64().unwrap_or(0))
    };
    let modified = short_timestamp(entry["modified"].as_str().unwrap_or("-"));

    format!("{} {:>10}  {}  {}", marker, size, modified, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1024), "1.0 KiB");
        assert_eq!(format_size(1536), "1.5 KiB");
        assert_eq!(format_size(1048576), "1.0 MiB");
    }

    #[test]
    fn test_short_timestamp() {
        assert_eq!(
            short_timestamp("2026-08-22T10:11:12.123456789Z"),
            "2026-08-22 10:11:12"
        );
        assert_eq!(short_timestamp("-"), "-");
    }

    #[test]
    fn test_entry_row_for_file_and_directory() {
        let file = json!({
            "name": "report.pdf",
            "isDirectory": false,
            "size": 2048,
            "modified": "2026-08-22T10:11:12Z",
        });
        let row = entry_row(&file);
        assert!(row.starts_with('-'));
        assert!(row.contains("2.0 KiB"));
        assert!(row.ends_with("report.pdf"));

        let dir = json!({ "name": "docs", "isDirectory": true, "size": 0 });
        let row = entry_row(&dir);
        assert!(row.starts_with('d'));
        assert!(row.ends_with("docs"));
    }
}
