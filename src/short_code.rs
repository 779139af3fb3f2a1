use std::{fmt, sync::Arc};

use rearch::CapsuleHandle;
use thiserror::Error;

use crate::config::short_code_length_capsule;

/// Digits and ASCII letters without the easily confused `0`, `O`, `1`, `l` and `I`.
pub const ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

pub const MIN_GENERATED_LENGTH: usize = 6;
pub const MAX_GENERATED_LENGTH: usize = 8;
pub const DEFAULT_GENERATED_LENGTH: usize = 7;

const MAX_PARSED_LENGTH: usize = 64;

/// A validated short code: non-empty ASCII alphanumerics, case-sensitive.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShortCode(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShortCodeValidationError {
    #[error("short code must not be empty")]
    Empty,
    #[error("short code is {len} characters long; at most {MAX_PARSED_LENGTH} are allowed")]
    TooLong { len: usize },
    #[error("short code contains invalid characters: {invalid_chars}")]
    InvalidCharacters { invalid_chars: String },
}

impl ShortCode {
    /// # Errors
    /// Will return [`Err`] if `code` is empty, too long, or not ASCII alphanumeric.
    pub fn parse(code: impl Into<String>) -> Result<Self, ShortCodeValidationError> {
        let code = code.into();
        if code.is_empty() {
            return Err(ShortCodeValidationError::Empty);
        }
        if code.len() > MAX_PARSED_LENGTH {
            return Err(ShortCodeValidationError::TooLong { len: code.len() });
        }

        let invalid_chars: String = code
            .chars()
            .filter(|c| !c.is_ascii_alphanumeric())
            .collect();
        if !invalid_chars.is_empty() {
            return Err(ShortCodeValidationError::InvalidCharacters { invalid_chars });
        }

        Ok(Self(code))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ShortCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait CodeGenerator: Send + Sync {
    fn generate(&self) -> ShortCode;
}

pub fn code_generator_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn CodeGenerator> {
    let length = *get.as_ref(short_code_length_capsule);
    Arc::new(RandomCodeGenerator::new(length))
}

/// Draws each character uniformly from [`ALPHABET`] using the thread-local RNG.
#[derive(Clone, Debug)]
pub struct RandomCodeGenerator {
    length: usize,
}

impl RandomCodeGenerator {
    /// # Panics
    /// Panics if `length` is outside of
    /// [`MIN_GENERATED_LENGTH`]..=[`MAX_GENERATED_LENGTH`].
    #[must_use]
    pub fn new(length: usize) -> Self {
        assert!(
            (MIN_GENERATED_LENGTH..=MAX_GENERATED_LENGTH).contains(&length),
            "short code length must be within {MIN_GENERATED_LENGTH}..={MAX_GENERATED_LENGTH}, got {length}"
        );
        Self { length }
    }

    #[must_use]
    pub const fn length(&self) -> usize {
        self.length
    }
}

impl Default for RandomCodeGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_GENERATED_LENGTH)
    }
}

impl CodeGenerator for RandomCodeGenerator {
    fn generate(&self) -> ShortCode {
        let code = (0..self.length)
            .map(|_| char::from(ALPHABET[rand::random_range(0..ALPHABET.len())]))
            .collect();
        // NOTE: ALPHABET is alphanumeric and length is bounded, so no validation needed
        ShortCode(code)
    }
}
