//! Guarded arithmetic. Every percentage and index in the engine goes through
//! these helpers so that NaN and infinities never reach a caller.

/// Divides `a` by `b`, returning `fallback` when either operand is not finite,
/// when `b` is zero, or when the quotient itself overflows.
pub fn safe_divide(a: f64, b: f64, fallback: f64) -> f64 {
    if !a.is_finite() || !b.is_finite() || b == 0.0 {
        return fallback;
    }
    let result = a / b;
    if result.is_finite() {
        result
    } else {
        fallback
    }
}

/// `safe_divide` with the usual zero fallback.
pub fn safe_ratio(a: f64, b: f64) -> f64 {
    safe_divide(a, b, 0.0)
}

/// Share of `part` in `whole`, expressed per 100.
pub fn percent_of(part: f64, whole: f64) -> f64 {
    safe_ratio(part, whole) * 100.0
}

/// Bounds `n` to `[lo, hi]`. Non-finite input collapses to `lo`.
///
/// Callers must pass `lo <= hi`; in debug builds this is asserted.
pub fn clamp(n: f64, lo: f64, hi: f64) -> f64 {
    debug_assert!(lo <= hi, "clamp called with lo > hi ({} > {})", lo, hi);
    if !n.is_finite() {
        return lo;
    }
    n.max(lo).min(hi)
}

/// Replaces a non-finite value with zero.
pub fn finite_or_zero(n: f64) -> f64 {
    if n.is_finite() {
        n
    } else {
        0.0
    }
}

/// Formats a percentage for display; non-finite values render as "0%".
pub fn safe_percent(n: f64, decimals: usize) -> String {
    if !n.is_finite() {
        return "0%".to_string();
    }
    format!("{:.*}%", decimals, n)
}
