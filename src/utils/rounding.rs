/// Round half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let factor = 10f64.powi(decimals as i32);
    let scaled = value * factor;
    // Nudge values sitting a rounding error below .5 (e.g. 1.005 * 100)
    let nudged = scaled + scaled.signum() * scaled.abs() * f64::EPSILON;
    nudged.round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to_two_decimals() {
        assert_eq!(round_to(21.8349, 2), 21.83);
        assert_eq!(round_to(21.835, 2), 21.84);
        assert_eq!(round_to(-3.14159, 2), -3.14);
        assert_eq!(round_to(1.005, 2), 1.01);
    }

    #[test]
    fn test_round_to_four_decimals() {
        assert_eq!(round_to(0.12345678, 4), 0.1235);
        assert_eq!(round_to(0.0, 4), 0.0);
    }

    #[test]
    fn test_round_passes_through_non_finite() {
        assert!(round_to(f64::NAN, 2).is_nan());
        assert_eq!(round_to(f64::INFINITY, 2), f64::INFINITY);
    }
}
