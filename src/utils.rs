// Rounding helpers shared across the analyzers.

/// Rounds to 2 decimals (USD cents).
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Rounds to 1 decimal (percentages).
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Signed percent difference of `price` against `reference`, positive when the
/// price is below the reference. Returns 0.0 for a non-positive reference.
pub fn percent_below(reference: f64, price: f64) -> f64 {
    if reference <= 0.0 {
        return 0.0;
    }
    round1((reference - price) / reference * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(round2(583.335), 583.34);
        assert_eq!(round1(14.25), 14.3);
        assert_eq!(round1(-14.25), -14.3);
    }

    #[test]
    fn percent_below_is_signed() {
        assert_eq!(percent_below(1000.0, 650.0), 35.0);
        assert_eq!(percent_below(100.0, 115.0), -15.0);
        assert_eq!(percent_below(0.0, 50.0), 0.0);
    }
}
