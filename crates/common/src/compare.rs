//! Timing-safe string comparison

use subtle::ConstantTimeEq;

/// Compare two strings without short-circuiting on the first differing byte.
///
/// A length mismatch still performs a same-length comparison before
/// returning false, so the time taken does not depend on where the inputs
/// diverge.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();

    if a.len() == b.len() {
        a.ct_eq(b).into()
    } else {
        let _ = a.ct_eq(a);
        false
    }
}
