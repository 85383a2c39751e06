//! Small string helpers shared across the crate.

use rand::distributions::{Distribution, Slice};
use rand::Rng;

const RAND_ALPHABET: &[char] = &[
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's',
    't', 'u', 'v', 'w', 'x', 'y', 'z', '1', '2', '3', '4', '5', '6', '7', '8', '9', '0',
];

/// Truncates a string to a maximum number of characters (not bytes).
///
/// This is UTF-8 safe and will not panic on multi-byte characters.
///
/// # Examples
///
/// ```
/// use companion_bot::utils::truncate_str;
/// let s = "Привет, мир!";
/// assert_eq!(truncate_str(s, 6), "Привет");
/// ```
pub fn truncate_str(s: impl AsRef<str>, max_chars: usize) -> String {
    let s = s.as_ref();
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.char_indices()
        .nth(max_chars)
        .map_or_else(|| s.to_string(), |(pos, _)| s[..pos].to_string())
}

/// Random string of `size` lowercase latin letters and digits drawn from `rng`.
pub fn rand_string_with<R: Rng + ?Sized>(rng: &mut R, size: usize) -> String {
    // Slice::new only fails on an empty slice
    let Ok(alphabet) = Slice::new(RAND_ALPHABET) else {
        return String::new();
    };
    (0..size).map(|_| *alphabet.sample(rng)).collect()
}

/// Masks everything but the bot id part of a token, for log lines.
#[must_use]
pub fn mask_token(token: &str) -> String {
    match token.split_once(':') {
        Some((id, secret)) => format!("{id}:{}", "*".repeat(secret.chars().count())),
        None => "*".repeat(token.chars().count()),
    }
}
