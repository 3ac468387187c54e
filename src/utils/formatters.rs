/// Converts bytes to human-readable file size format
pub fn format_file_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    match bytes {
        b if b >= GB => format!("{:.2} GB", b as f64 / GB as f64),
        b if b >= MB => format!("{:.2} MB", b as f64 / MB as f64),
        b if b >= KB => format!("{:.2} KB", b as f64 / KB as f64),
        b => format!("{b} B"),
    }
}

/// Truncates a display name to `max_len` characters with an ellipsis.
pub fn truncate_name(name: &str, max_len: usize) -> String {
    if name.chars().count() <= max_len {
        name.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        let head: String = name.chars().take(max_len - 3).collect();
        format!("{head}...")
    }
}

/// Reduce a peer-supplied file name to a single safe path component.
///
/// Directory parts and traversal segments are dropped; only alphanumerics,
/// `.`, `-`, `_` and spaces survive. Falls back to `"file"`.
pub fn sanitize_file_name(name: &str) -> String {
    let normalized = name.replace('\\', "/");
    let last = normalized
        .split('/')
        .filter(|s| !s.is_empty() && !matches!(*s, "." | ".."))
        .next_back()
        .unwrap_or("");

    let safe: String = last
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' '))
        .collect();
    let safe = safe.trim_start_matches('.');

    if safe.is_empty() {
        "file".to_string()
    } else {
        safe.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(0), "0 B");
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(1024), "1.00 KB");
        assert_eq!(format_file_size(1536), "1.50 KB");
        assert_eq!(format_file_size(1048576), "1.00 MB");
        assert_eq!(format_file_size(1073741824), "1.00 GB");
    }

    #[test]
    fn test_truncate_name() {
        assert_eq!(truncate_name("short.txt", 20), "short.txt");
        assert_eq!(truncate_name("verylongfilename.txt", 10), "verylon...");
        assert_eq!(truncate_name("test", 2), "...");
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\bob\\cat.png"), "cat.png");
        assert_eq!(sanitize_file_name(".."), "file");
        assert_eq!(sanitize_file_name("..hidden"), "hidden");
        assert_eq!(sanitize_file_name("a<b>c.txt"), "abc.txt");
        assert_eq!(sanitize_file_name(""), "file");
    }
}
