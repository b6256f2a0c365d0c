//! Kubernetes resource quantity parsing
//!
//! Quantities arrive as strings like `250m`, `2`, `1Gi`, `1.5G`, `100n` or
//! with a decimal exponent such as `1e3`.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use tracing::debug;

/// Split a quantity into its numeric part and its suffix
fn split(quantity: &str) -> Option<(f64, &str)> {
    let quantity = quantity.trim();
    if quantity.is_empty() {
        return None;
    }
    let boundary = quantity
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(quantity.len());
    let (number, suffix) = quantity.split_at(boundary);
    if number.is_empty() {
        return None;
    }
    let mut value: f64 = number.parse().ok()?;
    if value < 0.0 {
        return None;
    }

    // `1e3` and `2E6` scale the number; a bare `E` is still the exa suffix
    if let Some(exponent) = decimal_exponent(suffix) {
        value *= 10f64.powi(exponent);
        if !value.is_finite() {
            return None;
        }
        return Some((value, ""));
    }
    Some((value, suffix))
}

fn decimal_exponent(suffix: &str) -> Option<i32> {
    let digits = suffix.strip_prefix(|c: char| c == 'e' || c == 'E')?;
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

fn multiplier(suffix: &str) -> Option<f64> {
    let m = match suffix {
        "" => 1.0,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" | "K" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        _ => return None,
    };
    Some(m)
}

/// Round up, ignoring float noise around whole numbers
fn ceil_whole(x: f64) -> u64 {
    let nearest = x.round();
    if (x - nearest).abs() < 1e-6 {
        nearest as u64
    } else {
        x.ceil() as u64
    }
}

/// CPU quantity in millicores, rounded up
pub fn parse_cpu_millis(quantity: &str) -> Option<u64> {
    let (value, suffix) = split(quantity)?;
    let Some(factor) = multiplier(suffix) else {
        debug!(quantity, "unknown CPU unit");
        return None;
    };
    Some(ceil_whole(value * factor * 1000.0))
}

/// Memory or storage quantity in bytes, rounded up
pub fn parse_bytes(quantity: &str) -> Option<u64> {
    let (value, suffix) = split(quantity)?;
    let Some(factor) = multiplier(suffix) else {
        debug!(quantity, "unknown memory unit");
        return None;
    };
    Some(ceil_whole(value * factor))
}

/// Plain counts such as pod slots or accelerator chips
pub fn parse_count(quantity: &str) -> Option<u64> {
    parse_bytes(quantity)
}

pub fn cpu_millis(q: Option<&Quantity>) -> u64 {
    q.and_then(|q| parse_cpu_millis(&q.0)).unwrap_or(0)
}

pub fn bytes(q: Option<&Quantity>) -> u64 {
    q.and_then(|q| parse_bytes(&q.0)).unwrap_or(0)
}

pub fn count(q: Option<&Quantity>) -> u64 {
    q.and_then(|q| parse_count(&q.0)).unwrap_or(0)
}

/// Nanocores as reported by the kubelet, converted to millicores
pub fn nanocores_to_millis(nanocores: u64) -> u64 {
    nanocores / 1_000_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_empty() {
        assert_eq!(parse_cpu_millis(""), None);
        assert_eq!(parse_cpu_millis("m"), None);
    }

    #[test]
    fn test_cpu_millicores() {
        assert_eq!(parse_cpu_millis("250m"), Some(250));
    }

    #[test]
    fn test_cpu_whole_and_fractional_cores() {
        assert_eq!(parse_cpu_millis("2"), Some(2000));
        assert_eq!(parse_cpu_millis("0.5"), Some(500));
    }

    #[test]
    fn test_cpu_nanocores_round_up() {
        assert_eq!(parse_cpu_millis("100n"), Some(1));
        assert_eq!(parse_cpu_millis("1500000n"), Some(2));
    }

    #[test]
    fn test_unknown_cpu_unit() {
        assert_eq!(parse_cpu_millis("100rrr"), None);
    }

    #[test]
    fn test_memory_binary_suffixes() {
        assert_eq!(parse_bytes("1Gi"), Some(1_073_741_824));
        assert_eq!(parse_bytes("1000Mi"), Some(1_048_576_000));
        assert_eq!(parse_bytes("16Ki"), Some(16_384));
    }

    #[test]
    fn test_memory_decimal_suffixes() {
        assert_eq!(parse_bytes("1.5G"), Some(1_500_000_000));
        assert_eq!(parse_bytes("1000k"), Some(1_000_000));
        assert_eq!(parse_bytes("1000"), Some(1000));
    }

    #[test]
    fn test_decimal_exponents() {
        assert_eq!(parse_bytes("1e3"), Some(1000));
        assert_eq!(parse_bytes("2E6"), Some(2_000_000));
        assert_eq!(parse_bytes("1.5e+3"), Some(1500));
        assert_eq!(parse_cpu_millis("1e3"), Some(1_000_000));
        assert_eq!(parse_cpu_millis("5e-1"), Some(500));
        // exa, not an exponent
        assert_eq!(parse_bytes("2E"), Some(2_000_000_000_000_000_000));
        assert_eq!(parse_bytes("1e"), None);
        assert_eq!(parse_bytes("1e3Mi"), None);
    }

    #[test]
    fn test_counts() {
        assert_eq!(parse_count("110"), Some(110));
        assert_eq!(count(Some(&Quantity("4".to_string()))), 4);
        assert_eq!(count(None), 0);
    }

    #[test]
    fn test_nanocores() {
        assert_eq!(nanocores_to_millis(250_000_000), 250);
        assert_eq!(nanocores_to_millis(999_999), 0);
    }
}
