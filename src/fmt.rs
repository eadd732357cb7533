use crate::models::Money;

pub const CURRENCY: &str = "FCFA";

/// Format an amount with space thousands separators: 1 234 567.50 FCFA
pub fn money(val: Money) -> String {
    let value = val.value().round_dp(2);
    let negative = value.is_sign_negative() && !value.is_zero();
    let fixed = format!("{:.2}", value.abs());
    let (int_part, dec_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::new();
    for (i, c) in int_part.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(c);
    }
    let grouped: String = grouped.chars().rev().collect();

    if negative {
        format!("-{grouped}.{dec_part} {CURRENCY}")
    } else {
        format!("{grouped}.{dec_part} {CURRENCY}")
    }
}

/// Signed amount for movement listings: +100.00 / -25.00
pub fn signed(val: Money) -> String {
    let formatted = money(val);
    if val.is_positive() {
        format!("+{formatted}")
    } else {
        formatted
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(s: &str) -> Money {
        s.parse().unwrap()
    }

    #[test]
    fn test_money_formatting() {
        assert_eq!(money(m("1234.56")), "1 234.56 FCFA");
        assert_eq!(money(m("-500")), "-500.00 FCFA");
        assert_eq!(money(Money::ZERO), "0.00 FCFA");
        assert_eq!(money(m("1000000.99")), "1 000 000.99 FCFA");
        assert_eq!(money(m("42.1")), "42.10 FCFA");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_signed() {
        assert_eq!(signed(m("100")), "+100.00 FCFA");
        assert_eq!(signed(m("-25")), "-25.00 FCFA");
    }
}
