//! Phone number normalization and fuzzy matching.
//!
//! Signal sources report the same physical number in different shapes
//! (`+1 555-123-4567`, `5551234567`, `0015551234567`). Matching is therefore
//! done on digits only, with a suffix comparison to absorb country-code and
//! trunk-prefix noise.

use thiserror::Error;

/// Default number of trailing digits compared by [`likely_match`].
pub const DEFAULT_MATCH_SUFFIX_LEN: usize = 7;

/// The input contained no digits at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid phone number: {0:?}")]
pub struct InvalidNumber(pub String);

/// Strips everything but ASCII digits.
pub fn normalize(number: &str) -> Result<String, InvalidNumber> {
    let digits: String = number.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        Err(InvalidNumber(number.to_string()))
    } else {
        Ok(digits)
    }
}

/// Returns true if two raw numbers probably refer to the same line.
///
/// Uses [`DEFAULT_MATCH_SUFFIX_LEN`] trailing digits.
pub fn likely_match(a: &str, b: &str) -> bool {
    likely_match_with(a, b, DEFAULT_MATCH_SUFFIX_LEN)
}

/// Like [`likely_match`] with an explicit suffix length.
///
/// Exact digit equality always matches. Otherwise both numbers need at least
/// `suffix_len` digits and equal trailing `suffix_len` digits. An input that
/// does not normalize never matches anything.
pub fn likely_match_with(a: &str, b: &str, suffix_len: usize) -> bool {
    let (Ok(na), Ok(nb)) = (normalize(a), normalize(b)) else {
        return false;
    };
    if na == nb {
        return true;
    }
    if suffix_len == 0 || na.len() < suffix_len || nb.len() < suffix_len {
        return false;
    }
    // Digits are ASCII, so byte slicing is on char boundaries.
    na[na.len() - suffix_len..] == nb[nb.len() - suffix_len..]
}
