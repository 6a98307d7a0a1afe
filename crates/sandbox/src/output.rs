//! Output budget enforcement shared by every backend.

/// Byte budget applied to captured process output.
pub const MAX_OUTPUT_BYTES: usize = 10_000;

/// Appended when output exceeded its budget.
pub const TRUNCATION_MARKER: &str = "... [output truncated]";

/// Bound `raw` to `limit` bytes.
///
/// Text within budget is returned unchanged. Otherwise the longest prefix of
/// at most `limit` bytes that ends on a UTF-8 character boundary is kept and
/// [`TRUNCATION_MARKER`] appended, so the result never exceeds
/// `limit + TRUNCATION_MARKER.len()` bytes.
pub fn truncate_output(raw: &str, limit: usize) -> String {
    if raw.len() <= limit {
        return raw.to_string();
    }

    let mut cut = limit;
    while !raw.is_char_boundary(cut) {
        cut -= 1;
    }

    let mut out = String::with_capacity(cut + TRUNCATION_MARKER.len());
    out.push_str(&raw[..cut]);
    out.push_str(TRUNCATION_MARKER);
    out
}
