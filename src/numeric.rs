//! Lenient numeric coercions for source text.
//!
//! Dataset and reference files come from spreadsheets exported with a
//! European locale: `.` groups thousands, `,` marks the decimal point, and
//! tariffs carry a trailing `%`. None of these helpers fail; text that cannot
//! be read as a number collapses to zero.

/// Parses `"1.234,56"` style numbers. Periods are removed first, then the
/// comma becomes the decimal point. Unparseable input yields `0.0`.
pub fn parse_float_european(value: &str) -> f64 {
    let normalized = value.trim().replace('.', "").replace(',', ".");
    normalized.parse::<f64>().unwrap_or(0.0)
}

/// Like [`parse_float_european`] but keeps blank cells distinguishable.
pub fn parse_optional_european(value: &str) -> Option<f64> {
    if value.trim().is_empty() {
        None
    } else {
        Some(parse_float_european(value))
    }
}

/// Converts `"12,5%"` into the fraction `0.125`. Unparseable input yields `0.0`.
pub fn parse_percentage(value: &str) -> f64 {
    let normalized = value.trim().replace('%', "").replace(',', ".");
    match normalized.trim().parse::<f64>() {
        Ok(parsed) => parsed / 100.0,
        Err(_) => 0.0,
    }
}

/// Coerces a year cell to an integer; anything non-numeric becomes `0`.
///
/// Decimal spellings such as `"2021.0"` truncate toward zero.
pub fn coerce_year(value: &str) -> i64 {
    let trimmed = value.trim();
    if let Ok(year) = trimmed.parse::<i64>() {
        return year;
    }
    match trimmed.parse::<f64>() {
        Ok(parsed) if parsed.is_finite() => parsed.trunc() as i64,
        _ => 0,
    }
}

/// Coerces a plain (dot-decimal) number; anything non-numeric becomes `0.0`.
pub fn coerce_number(value: &str) -> f64 {
    match value.trim().parse::<f64>() {
        Ok(parsed) if !parsed.is_nan() => parsed,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn european_float_handles_thousands_and_decimal_comma() {
        assert_eq!(parse_float_european("1.234,56"), 1234.56);
        assert_eq!(parse_float_european("1.234.567"), 1_234_567.0);
        assert_eq!(parse_float_european(" 42 "), 42.0);
        assert_eq!(parse_float_european("abc"), 0.0);
        assert_eq!(parse_float_european(""), 0.0);
    }

    #[test]
    fn european_float_strips_dot_decimals() {
        // A dot is always a thousands separator in this format.
        assert_eq!(parse_float_european("12.5"), 125.0);
    }

    #[test]
    fn optional_european_keeps_blank_cells_absent() {
        assert_eq!(parse_optional_european("   "), None);
        assert_eq!(parse_optional_european("7,5"), Some(7.5));
        assert_eq!(parse_optional_european("x"), Some(0.0));
    }

    #[test]
    fn percentage_becomes_fraction() {
        assert!((parse_percentage("12,5%") - 0.125).abs() < 1e-12);
        assert!((parse_percentage("3%") - 0.03).abs() < 1e-12);
        assert!((parse_percentage("7.5 %") - 0.075).abs() < 1e-12);
        assert_eq!(parse_percentage("abc"), 0.0);
        assert_eq!(parse_percentage(""), 0.0);
    }

    #[test]
    fn year_coercion_defaults_to_zero() {
        assert_eq!(coerce_year("2023"), 2023);
        assert_eq!(coerce_year(" 2021.0 "), 2021);
        assert_eq!(coerce_year("n/a"), 0);
        assert_eq!(coerce_year(""), 0);
    }

    #[test]
    fn number_coercion_defaults_to_zero() {
        assert_eq!(coerce_number("3"), 3.0);
        assert_eq!(coerce_number("2.5"), 2.5);
        assert_eq!(coerce_number("tier-1"), 0.0);
        assert_eq!(coerce_number("NaN"), 0.0);
    }
}
