//! Persian-Arabic numeral conversion for display strings.

const PERSIAN_ZERO: u32 = 0x06F0;
const ARABIC_INDIC_ZERO: u32 = 0x0660;

/// Replaces every ASCII digit with its Persian-Arabic counterpart (U+06F0..U+06F9).
/// All other characters pass through untouched.
pub fn to_persian_digits(value: &str) -> String {
    value
        .chars()
        .map(|c| match c.to_digit(10) {
            Some(d) if c.is_ascii_digit() => char::from_u32(PERSIAN_ZERO + d).unwrap_or(c),
            _ => c,
        })
        .collect()
}

/// Inverse of [`to_persian_digits`]; also folds Arabic-Indic digits so typed
/// input in either script parses as a number.
pub fn to_ascii_digits(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            let cp = c as u32;
            if (PERSIAN_ZERO..PERSIAN_ZERO + 10).contains(&cp) {
                char::from(b'0' + (cp - PERSIAN_ZERO) as u8)
            } else if (ARABIC_INDIC_ZERO..ARABIC_INDIC_ZERO + 10).contains(&cp) {
                char::from(b'0' + (cp - ARABIC_INDIC_ZERO) as u8)
            } else {
                c
            }
        })
        .collect()
}

/// Display form of a computed number: at most two decimals, trailing zeros
/// dropped, Persian digits.
pub fn format_number(value: f64) -> String {
    if !value.is_finite() {
        return String::new();
    }
    let fixed = format!("{:.2}", value);
    let trimmed = if fixed.contains('.') {
        fixed.trim_end_matches('0').trim_end_matches('.')
    } else {
        fixed.as_str()
    };
    let trimmed = if trimmed == "-0" { "0" } else { trimmed };
    to_persian_digits(trimmed)
}

pub fn format_count(value: usize) -> String {
    to_persian_digits(&value.to_string())
}
