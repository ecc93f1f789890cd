//! Quota display helpers

/// Internal quota units per display unit
pub const QUOTA_PER_UNIT: f64 = 500_000.0;

/// Render an amount of quota as a currency-style figure for logs and output
///
/// `format_quota(500_000)` is `"$1.000000"`.
pub fn format_quota(quota: i64) -> String {
    let units = quota as f64 / QUOTA_PER_UNIT;
    if units < 0.0 {
        format!("-${:.6}", -units)
    } else {
        format!("${:.6}", units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_quota() {
        assert_eq!(format_quota(0), "$0.000000");
        assert_eq!(format_quota(500_000), "$1.000000");
        assert_eq!(format_quota(1_000), "$0.002000");
        assert_eq!(format_quota(-250_000), "-$0.500000");
    }
}
