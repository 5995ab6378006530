//! Human-readable renderings for sizes and elapsed times.

const SIZE_UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

/// Format a byte count with 1024-based magnitude steps and one decimal.
///
/// A whole-number result drops its trailing `.0` (`1024` → `"1 KB"`).
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = (value * 10.0).round() / 10.0;
    if rounded.fract() == 0.0 {
        format!("{:.0} {}", rounded, SIZE_UNITS[unit])
    } else {
        format!("{:.1} {}", rounded, SIZE_UNITS[unit])
    }
}

/// Elapsed milliseconds between two timestamps expressed in seconds.
///
/// An unset end (`0`) or an end before the start yields zero.
pub fn elapsed_millis(start_timestamp: f64, end_timestamp: f64) -> f64 {
    if end_timestamp <= 0.0 || end_timestamp < start_timestamp {
        return 0.0;
    }
    (end_timestamp - start_timestamp) * 1000.0
}

/// Render elapsed milliseconds for display
pub fn format_millis(millis: f64) -> String {
    format!("{} ms", millis.round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes_zero() {
        assert_eq!(format_bytes(0), "0 B");
    }

    #[test]
    fn test_format_bytes_magnitudes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024 + 300 * 1024 * 1024), "1.3 GB");
    }

    #[test]
    fn test_format_bytes_caps_at_gigabytes() {
        assert_eq!(format_bytes(2 * 1024 * 1024 * 1024 * 1024), "2048 GB");
    }

    #[test]
    fn test_elapsed_millis() {
        assert_eq!(elapsed_millis(100.0, 100.25), 250.0);
        assert_eq!(elapsed_millis(100.0, 0.0), 0.0);
        assert_eq!(elapsed_millis(100.0, 99.0), 0.0);
        assert_eq!(format_millis(elapsed_millis(10.0, 10.1234)), "123 ms");
    }
}
