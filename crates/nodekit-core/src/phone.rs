//! E.164 caller-address normalization.
//!
//! The interception path must never reject a call because of a malformed
//! address, so normalization is a total function at that boundary: callers
//! there treat any error as "proceed unbranded". Stores and the sync engine
//! use the strict form to keep the cache keyed consistently.

use thiserror::Error;

/// Maximum digits in an E.164 number (ITU-T E.164).
const MAX_E164_DIGITS: usize = 15;

/// Minimum digits accepted; anything shorter cannot be a routable number.
const MIN_E164_DIGITS: usize = 3;

/// Errors from caller-address normalization.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PhoneError {
    /// Input was empty or whitespace.
    #[error("empty caller address")]
    Empty,

    /// Input contained characters other than digits and separators.
    #[error("caller address contains invalid character: {0:?}")]
    InvalidCharacter(char),

    /// Digit count outside the E.164 range.
    #[error("caller address has {0} digits, expected {MIN_E164_DIGITS}..={MAX_E164_DIGITS}")]
    InvalidLength(usize),
}

/// Normalizes a raw caller address to E.164 form (`+` followed by digits).
///
/// Accepts common separator characters (space, dash, dot, parentheses,
/// slash) and a single leading `+`. The `+` is preserved when present and
/// never invented: a bare national number stays bare digits, since guessing
/// a country code would corrupt the cache key.
///
/// # Errors
///
/// Returns [`PhoneError`] when the input is empty, contains invalid
/// characters, or has an out-of-range digit count.
pub fn normalize_e164(raw: &str) -> Result<String, PhoneError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PhoneError::Empty);
    }

    let (has_plus, body) = match trimmed.strip_prefix('+') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let mut digits = String::with_capacity(body.len());
    for c in body.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' | '.' | '(' | ')' | '/' => {},
            other => return Err(PhoneError::InvalidCharacter(other)),
        }
    }

    if digits.len() < MIN_E164_DIGITS || digits.len() > MAX_E164_DIGITS {
        return Err(PhoneError::InvalidLength(digits.len()));
    }

    if has_plus {
        Ok(format!("+{digits}"))
    } else {
        Ok(digits)
    }
}
