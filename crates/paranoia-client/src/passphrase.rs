use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PassphraseError {
    #[error("must be at least {0} characters")]
    TooShort(usize),

    #[error("must be at most {0} characters")]
    TooLong(usize),

    #[error("must have at least {0} words")]
    TooFewWords(usize),
}

/// Local checks a passphrase must pass before anything is derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassphrasePolicy {
    pub min_len: usize,
    pub min_words: usize,
    pub max_len: usize,
}

impl Default for PassphrasePolicy {
    fn default() -> Self {
        Self {
            min_len: 12,
            min_words: 3,
            max_len: 256,
        }
    }
}

impl PassphrasePolicy {
    /// Lengths are counted in characters, words are whitespace-separated.
    pub fn validate(&self, passphrase: &str) -> Result<(), PassphraseError> {
        let len = passphrase.chars().count();
        if len < self.min_len {
            return Err(PassphraseError::TooShort(self.min_len));
        }
        if len > self.max_len {
            return Err(PassphraseError::TooLong(self.max_len));
        }
        if passphrase.split_whitespace().count() < self.min_words {
            return Err(PassphraseError::TooFewWords(self.min_words));
        }
        Ok(())
    }
}
