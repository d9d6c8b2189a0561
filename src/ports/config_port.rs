//! Configuration access port trait.

pub trait ConfigPort {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;
    fn get_int(&self, section: &str, key: &str, default: i64) -> i64;
}

/// A ratio written either as a plain number (`0.4`) or a percentage (`40%`).
pub fn parse_fraction(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    match trimmed.strip_suffix('%') {
        Some(pct) => pct.trim().parse::<f64>().ok().map(|v| v / 100.0),
        None => trimmed.parse::<f64>().ok(),
    }
}

pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_fraction_plain_and_percent() {
        assert_eq!(parse_fraction("0.4"), Some(0.4));
        assert_eq!(parse_fraction("40%"), Some(0.4));
        assert_eq!(parse_fraction(" 10 % "), Some(0.1));
        assert_eq!(parse_fraction("ten"), None);
    }

    #[test]
    fn parse_bool_words() {
        for raw in ["true", "Yes", "on", "1"] {
            assert_eq!(parse_bool(raw), Some(true), "{raw}");
        }
        for raw in ["false", "NO", " off ", "0"] {
            assert_eq!(parse_bool(raw), Some(false), "{raw}");
        }
        assert_eq!(parse_bool("flase"), None);
        assert_eq!(parse_bool(""), None);
    }
}
