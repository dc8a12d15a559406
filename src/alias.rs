//! Short alias generation
//!
//! Generators carry no uniqueness guarantee; callers detect collisions
//! through the storage layer and retry with a fresh candidate.

use rand::RngExt;

/// Alias length used when nothing else is configured
pub const DEFAULT_ALIAS_LENGTH: usize = 8;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Produces candidate aliases
pub trait AliasGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Uniformly random letters of a fixed length
#[derive(Debug, Clone, Copy)]
pub struct RandomAlias {
    length: usize,
}

impl RandomAlias {
    pub fn new(length: usize) -> Self {
        Self { length }
    }

    pub fn length(&self) -> usize {
        self.length
    }
}

impl Default for RandomAlias {
    fn default() -> Self {
        Self::new(DEFAULT_ALIAS_LENGTH)
    }
}

impl AliasGenerator for RandomAlias {
    fn generate(&self) -> String {
        random_string(self.length)
    }
}

/// Random string over the 52 ASCII letters
pub fn random_string(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}
