//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Clamp a value into the inclusive range `[min, max]`.
///
/// NaN values are passed through unchanged.
pub fn clamp<T>(value: &T, min: &T, max: &T) -> T
where
    T: Float,
{
    let mut ret = *value;

    if ret > *max {
        ret = *max
    }
    if ret < *min {
        ret = *min
    }

    ret
}

/// Calculates the least nonnegative remainder of `lhs (mod rhs)`.
///
/// This function is taken from the std library as num is missing it.
///
/// In particular, the return value `r` satisfies `0.0 <= r < rhs.abs()` in
/// most cases. However, due to a floating point round-off error it can
/// result in `r == rhs.abs()` if `lhs` is much smaller than `rhs.abs()` in
/// magnitude and `lhs < 0.0`.
pub fn rem_euclid<T>(lhs: T, rhs: T) -> T
where
    T: Float,
{
    let r = lhs % rhs;
    if r < T::zero() {
        r + rhs.abs()
    } else {
        r
    }
}

/// Wrap an angle into the half-open range `(-pi, pi]`.
///
/// An input of exactly `-pi` (or any odd multiple of `pi`) maps to `+pi`.
pub fn wrap_to_pi<T>(angle: T) -> T
where
    T: Float,
{
    let pi_t = T::from(std::f64::consts::PI).unwrap_or_else(T::zero);
    let tau_t = pi_t + pi_t;

    // Shift into [0, 2pi) then back into [-pi, pi)
    let mut wrapped = rem_euclid(angle + pi_t, tau_t) - pi_t;

    // Round-off in rem_euclid can land exactly on +pi, which is fine, but -pi must become +pi
    if wrapped <= -pi_t {
        wrapped = pi_t;
    }
    if wrapped > pi_t {
        wrapped = wrapped - tau_t;
    }

    wrapped
}

/// Map a value from one range into another.
pub fn lin_map<T>(source_range: (T, T), target_range: (T, T), value: T) -> T
where
    T: Float,
{
    target_range.0
        + ((value - source_range.0) * (target_range.1 - target_range.0)
            / (source_range.1 - source_range.0))
}

#[cfg(test)]
mod test {
    use super::*;

    const PI: f64 = std::f64::consts::PI;

    #[test]
    fn test_clamp() {
        assert_eq!(clamp(&2.0f64, &-1.0, &1.0), 1.0);
        assert_eq!(clamp(&-2.0f64, &-1.0, &1.0), -1.0);
        assert_eq!(clamp(&0.25f64, &-1.0, &1.0), 0.25);
    }

    #[test]
    fn test_wrap_to_pi() {
        assert!((wrap_to_pi(3.0 * PI / 2.0) - (-PI / 2.0)).abs() < 1e-12);
        assert!((wrap_to_pi(-3.0 * PI / 2.0) - (PI / 2.0)).abs() < 1e-12);
        assert_eq!(wrap_to_pi(PI), PI);
        assert_eq!(wrap_to_pi(-PI), PI);
        assert_eq!(wrap_to_pi(0.0f64), 0.0);
        assert!((wrap_to_pi(0.5 + 4.0 * PI) - 0.5).abs() < 1e-12);

        for i in -100..100 {
            let w = wrap_to_pi(i as f64 * 0.37);
            assert!(w > -PI && w <= PI, "{} wrapped to {}", i as f64 * 0.37, w);
        }
    }

    #[test]
    fn test_lin_map() {
        assert_eq!(lin_map((-1.0f64, 1.0), (0.0, 10.0), 0.0), 5.0);
        assert_eq!(lin_map((0.0f64, 1.0), (0.0, 4.0), 0.5), 2.0);
    }
}
