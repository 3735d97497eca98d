//! Centralized scalar sanitization before any value reaches the store.
//!
//! Replaces the scattered ad-hoc NaN/Inf handling spread across the original
//! processors with one pass, per the Design Notes. Both `StagingWriter` and
//! `Grader` route every numeric field through `sanitize_f64` before binding
//! it to a statement, and every free-text field through `sanitize_text`.

/// Convert non-finite floats (NaN, +Inf, -Inf) to `None`; pass finite values
/// through unchanged. SQLite has no native NaN/Inf representation worth
/// trusting downstream consumers with, so the boundary is here rather than
/// at each call site.
pub fn sanitize_f64(value: f64) -> Option<f64> {
    if value.is_finite() {
        Some(value)
    } else {
        None
    }
}

/// Strip ASCII control characters (other than whitespace already meaningful
/// in prose) from free-text fields before they're stored.
pub fn sanitize_text(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

/// Round a float to a fixed number of decimal places, matching the schema
/// precision the accuracy and prediction tables expect.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_and_inf_become_none() {
        assert_eq!(sanitize_f64(f64::NAN), None);
        assert_eq!(sanitize_f64(f64::INFINITY), None);
        assert_eq!(sanitize_f64(f64::NEG_INFINITY), None);
        assert_eq!(sanitize_f64(3.5), Some(3.5));
    }

    #[test]
    fn control_chars_stripped_but_whitespace_kept() {
        let input = "hello\u{0007}\tworld\n";
        assert_eq!(sanitize_text(input), "hello\tworld\n");
    }

    #[test]
    fn rounds_to_requested_precision() {
        assert_eq!(round_to(3.14159, 2), 3.14);
        assert_eq!(round_to(20.0001, 1), 20.0);
    }
}
