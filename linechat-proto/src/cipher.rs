//! Keyed letter substitution shared by every LineChat client and server.
//!
//! The cipher alphabet is the de-duplicated letters of the key followed by
//! the rest of the alphabet in order. Letters keep their case and anything
//! that is not an ASCII letter passes through untouched, so
//! `decrypt(encrypt(s)) == s` for every string.
//!
//! This is obfuscation, not encryption. The key is compiled in and there is
//! no way to detect a key mismatch: decoding with the wrong key simply
//! produces garbage.

use std::sync::LazyLock;

/// Shared secret compiled into both sides of the connection.
pub const DEFAULT_KEY: &str = "LINECHATKEY";

static DEFAULT_CIPHER: LazyLock<Cipher> = LazyLock::new(|| Cipher::new(DEFAULT_KEY));

/// A monoalphabetic substitution built from a keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cipher {
    /// `forward[p]` is the cipher letter index for plain letter index `p`.
    forward: [u8; 26],
    /// Inverse permutation of `forward`.
    inverse: [u8; 26],
}

impl Cipher {
    /// Builds the substitution table for `key`.
    ///
    /// Non-letters in the key are ignored and letters are case-folded. An
    /// empty key yields the identity substitution.
    #[must_use]
    pub fn new(key: &str) -> Self {
        let mut forward = [0u8; 26];
        let mut used = [false; 26];
        let mut next = 0;

        let key_letters = key
            .bytes()
            .filter(u8::is_ascii_alphabetic)
            .map(|b| b.to_ascii_uppercase() - b'A');

        for letter in key_letters.chain(0..26) {
            let idx = usize::from(letter);
            if !used[idx] {
                used[idx] = true;
                forward[next] = letter;
                next += 1;
            }
        }

        let mut inverse = [0u8; 26];
        for (plain, &cipher) in (0u8..).zip(forward.iter()) {
            inverse[usize::from(cipher)] = plain;
        }

        Self { forward, inverse }
    }

    /// Encodes `text` with this key.
    #[must_use]
    pub fn encrypt(&self, text: &str) -> String {
        text.chars().map(|c| substitute(c, &self.forward)).collect()
    }

    /// Decodes `text` that was produced by [`Cipher::encrypt`] with this key.
    #[must_use]
    pub fn decrypt(&self, text: &str) -> String {
        text.chars().map(|c| substitute(c, &self.inverse)).collect()
    }
}

impl Default for Cipher {
    fn default() -> Self {
        DEFAULT_CIPHER.clone()
    }
}

/// Encodes `text` with the compiled-in [`DEFAULT_KEY`].
#[must_use]
pub fn encrypt(text: &str) -> String {
    DEFAULT_CIPHER.encrypt(text)
}

/// Decodes `text` with the compiled-in [`DEFAULT_KEY`].
#[must_use]
pub fn decrypt(text: &str) -> String {
    DEFAULT_CIPHER.decrypt(text)
}

#[allow(clippy::cast_possible_truncation)]
fn substitute(c: char, table: &[u8; 26]) -> char {
    if c.is_ascii_uppercase() {
        char::from(b'A' + table[usize::from(c as u8 - b'A')])
    } else if c.is_ascii_lowercase() {
        char::from(b'a' + table[usize::from(c as u8 - b'a')])
    } else {
        c
    }
}
