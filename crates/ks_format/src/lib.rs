//! Formatting of numbers and byte sizes, shared by the Keystone diagnostics
//! surfaces.

/// Format an unsigned integer with thousands separators for readability.
pub fn format_uint(number: u64) -> String {
    let digits = number.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);

    let first_group = match digits.len() % 3 {
        0 => 3,
        n => n,
    };
    out.push_str(&digits[..first_group]);
    for group in digits[first_group..].as_bytes().chunks(3) {
        out.push('\u{2009}'); // thin space
        out.extend(group.iter().map(|&digit| digit as char));
    }
    out
}

/// Pretty-print a byte count using binary units, e.g.
///
/// ```
/// # use ks_format::format_bytes;
/// assert_eq!(format_bytes(42), "42 B");
/// assert_eq!(format_bytes(2048), "2.0 KiB");
/// assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MiB");
/// ```
pub fn format_bytes(number_of_bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;
    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

    let bytes = number_of_bytes as f64;
    if bytes < KIB {
        format!("{number_of_bytes} B")
    } else if bytes < MIB {
        format!("{:.1} KiB", bytes / KIB)
    } else if bytes < GIB {
        format!("{:.1} MiB", bytes / MIB)
    } else {
        format!("{:.1} GiB", bytes / GIB)
    }
}

/// Byte count in whole kibibytes, the unit the operator CLI reports in.
pub fn format_kib(number_of_bytes: u64) -> String {
    format!("{} KiB", format_uint(number_of_bytes / 1024))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uint() {
        assert_eq!(format_uint(0), "0");
        assert_eq!(format_uint(42), "42");
        assert_eq!(format_uint(999), "999");
        assert_eq!(format_uint(1_000), "1\u{2009}000");
        assert_eq!(format_uint(123_456), "123\u{2009}456");
        assert_eq!(format_uint(1_234_567), "1\u{2009}234\u{2009}567");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.0 KiB");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(1024 * 1024), "1.0 MiB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GiB");
    }

    #[test]
    fn test_format_kib() {
        assert_eq!(format_kib(4096), "4 KiB");
        assert_eq!(format_kib(10 * 1024 * 1024), "10\u{2009}240 KiB");
    }
}
