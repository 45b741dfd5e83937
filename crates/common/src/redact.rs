//! Log-safe rendering of credentials

/// Characters of a credential kept visible in logs.
const VISIBLE_PREFIX: usize = 8;

/// Render a credential as its first few characters followed by `...`.
///
/// Values no longer than the visible prefix are fully masked.
pub fn redact(value: &str) -> String {
    match value.char_indices().nth(VISIBLE_PREFIX) {
        Some((idx, _)) => format!("{}...", &value[..idx]),
        None => "***".to_string(),
    }
}
