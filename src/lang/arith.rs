//! Integer arithmetic shared by the constant folder and the register machine.
//!
//! Both sides call these functions, so a folded constant and the value the
//! VM computes at runtime are always identical. Overflow wraps.

/// `a + b`, wrapping.
pub fn add(a: i64, b: i64) -> i64 {
    a.wrapping_add(b)
}

/// `a - b`, wrapping.
pub fn sub(a: i64, b: i64) -> i64 {
    a.wrapping_sub(b)
}

/// `a * b`, wrapping.
pub fn mul(a: i64, b: i64) -> i64 {
    a.wrapping_mul(b)
}

/// Floor division (rounds toward negative infinity). A zero divisor yields 0.
pub fn floor_div(a: i64, b: i64) -> i64 {
    if b == 0 {
        return 0;
    }
    let q = a.wrapping_div(b);
    if a.wrapping_rem(b) != 0 && ((a < 0) != (b < 0)) {
        q.wrapping_sub(1)
    } else {
        q
    }
}

/// `a - floor_div(a, b) * b`; takes the sign of the divisor. `a % 0 == a`.
pub fn floor_mod(a: i64, b: i64) -> i64 {
    sub(a, mul(floor_div(a, b), b))
}

/// Float counterpart of [`floor_div`].
pub fn floor_div_f64(a: f64, b: f64) -> f64 {
    if b == 0.0 { 0.0 } else { (a / b).floor() }
}

pub fn floor_mod_f64(a: f64, b: f64) -> f64 {
    a - floor_div_f64(a, b) * b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_div_rounds_down() {
        assert_eq!(floor_div(7, 2), 3);
        assert_eq!(floor_div(-7, 2), -4);
        assert_eq!(floor_div(7, -2), -4);
        assert_eq!(floor_div(-7, -2), 3);
        assert_eq!(floor_div(-8, 2), -4);
    }

    #[test]
    fn test_zero_divisor_yields_zero() {
        assert_eq!(floor_div(42, 0), 0);
        assert_eq!(floor_mod(42, 0), 42);
        assert_eq!(floor_div_f64(1.5, 0.0), 0.0);
    }

    #[test]
    fn test_floor_mod_sign_follows_divisor() {
        assert_eq!(floor_mod(7, 3), 1);
        assert_eq!(floor_mod(-7, 3), 2);
        assert_eq!(floor_mod(7, -3), -2);
    }

    #[test]
    fn test_overflow_wraps() {
        assert_eq!(add(i64::MAX, 1), i64::MIN);
        assert_eq!(floor_div(i64::MIN, -1), i64::MIN);
        assert_eq!(mul(i64::MAX, 2), -2);
    }

    #[test]
    fn test_float_floor_div() {
        assert_eq!(floor_div_f64(7.5, 2.0), 3.0);
        assert_eq!(floor_div_f64(-7.5, 2.0), -4.0);
        assert_eq!(floor_mod_f64(7.5, 2.0), 1.5);
    }
}
