//! Minimal resource quantity arithmetic for CPU-like values
//!
//! Quantities are carried as strings on the wire. Only what the capacity
//! summary needs is supported: plain decimals, milli units, and the decimal
//! and binary SI multipliers. Values are summed in milli units.

use foundation_common::Error;

const SUFFIXES: &[(&str, i64)] = &[
    ("Ki", 1 << 10),
    ("Mi", 1 << 20),
    ("Gi", 1 << 30),
    ("Ti", 1 << 40),
    ("k", 1_000),
    ("M", 1_000_000),
    ("G", 1_000_000_000),
    ("T", 1_000_000_000_000),
];

/// Parse a quantity into milli units
pub fn parse_millis(quantity: &str) -> Result<i64, Error> {
    let q = quantity.trim();
    if q.is_empty() {
        return Ok(0);
    }
    if let Some(number) = q.strip_suffix('m') {
        return number
            .parse::<i64>()
            .map_err(|e| Error::validation(format!("invalid quantity {quantity:?}: {e}")));
    }

    let (number, multiplier) = SUFFIXES
        .iter()
        .find_map(|(suffix, m)| q.strip_suffix(suffix).map(|n| (n, *m)))
        .unwrap_or((q, 1));

    let value: f64 = number
        .parse()
        .map_err(|e| Error::validation(format!("invalid quantity {quantity:?}: {e}")))?;
    Ok((value * multiplier as f64 * 1000.0).round() as i64)
}

/// Format milli units the way the API server canonicalizes them
pub fn format_millis(millis: i64) -> String {
    if millis % 1000 == 0 {
        (millis / 1000).to_string()
    } else {
        format!("{millis}m")
    }
}

/// Sum quantities; an unparseable value is an error
pub fn sum<'a>(quantities: impl IntoIterator<Item = &'a str>) -> Result<String, Error> {
    let mut total = 0i64;
    for q in quantities {
        total += parse_millis(q)?;
    }
    Ok(format_millis(total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("4", 4000)]
    #[case("500m", 500)]
    #[case("1.5", 1500)]
    #[case("2k", 2_000_000)]
    #[case("1Ki", 1_024_000)]
    #[case("", 0)]
    fn parses(#[case] input: &str, #[case] millis: i64) {
        assert_eq!(parse_millis(input).expect("parse"), millis);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_millis("four").is_err());
        assert!(parse_millis("1.5m").is_err());
    }

    #[rstest]
    #[case(&["4", "8"], "12")]
    #[case(&["500m", "1"], "1500m")]
    #[case(&["500m", "500m"], "1")]
    #[case(&[], "0")]
    fn sums(#[case] inputs: &[&str], #[case] expected: &str) {
        assert_eq!(sum(inputs.iter().copied()).expect("sum"), expected);
    }
}
