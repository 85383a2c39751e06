//! Companion bot username generation.

use rand::seq::SliceRandom;
use rand::Rng;

/// Mock-Latin words used as the readable part of generated usernames
const LATIN_MOCK: &[&str] = &[
    "amor", "arbor", "astra", "aurum", "bellum", "caelum", "calor", "castra", "cura", "dolor",
    "domus", "fatum", "flora", "fortuna", "gloria", "ignis", "ipsum", "iustitia", "lorem",
    "ludus", "lumen", "lupus", "magna", "mare", "mens", "mundus", "orbis",
    "porta", "silva", "stella", "terra", "tempus", "umbra", "ventus", "veritas", "vita",
];

/// Only reached if the word list is empty
const DEFAULT_WORD: &str = "lorem";

/// Length of the random id segment
pub const ID_LEN: usize = 6;

/// Generates `@<word>_<6 random chars>_bot` from `rng`
pub fn generate_with<R: Rng + ?Sized>(rng: &mut R) -> String {
    let word = LATIN_MOCK.choose(rng).copied().unwrap_or(DEFAULT_WORD);
    let id = crate::utils::rand_string_with(rng, ID_LEN);
    format!("@{word}_{id}_bot")
}

/// Generates a fresh companion bot username
#[must_use]
pub fn generate() -> String {
    generate_with(&mut rand::thread_rng())
}
