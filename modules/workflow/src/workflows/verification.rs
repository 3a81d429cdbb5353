//! Certificate verification codes.

use rand::Rng;

/// `A-Z` and `0-9` without the look-alikes `0 O 1 I`.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const DEFAULT_CODE_LENGTH: usize = 10;
pub const DEFAULT_CODE_ATTEMPTS: u32 = 10;

/// Source of candidate codes. Uniqueness is checked by the caller.
pub trait CodeGenerator: Send + Sync {
    fn generate(&self) -> String;
}

#[derive(Debug, Clone, Copy)]
pub struct RandomCodeGenerator {
    length: usize,
}

impl RandomCodeGenerator {
    #[must_use]
    pub fn new(length: usize) -> Self {
        Self { length }
    }
}

impl Default for RandomCodeGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_CODE_LENGTH)
    }
}

impl CodeGenerator for RandomCodeGenerator {
    fn generate(&self) -> String {
        let mut rng = rand::rng();
        (0..self.length)
            .map(|_| char::from(CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())]))
            .collect()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn codes_use_unambiguous_alphabet() {
        let generator = RandomCodeGenerator::default();
        for _ in 0..200 {
            let code = generator.generate();
            assert_eq!(code.len(), DEFAULT_CODE_LENGTH);
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)), "{code}");
            assert!(!code.contains(['0', 'O', '1', 'I']));
        }
    }

    #[test]
    fn alphabet_has_no_duplicates() {
        let mut sorted = CODE_ALPHABET.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), CODE_ALPHABET.len());
        assert_eq!(CODE_ALPHABET.len(), 32);
    }
}
