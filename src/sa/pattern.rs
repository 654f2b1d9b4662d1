//! Byte patterns with wildcards, for signature scans over `__text`.

use crate::errors::{Error, Result};

/// Compiled search pattern: one byte plus mask per position. A `??` token
/// matches any byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    bytes: Vec<u8>,
    mask: Vec<bool>,
}

impl Pattern {
    /// Compiles a space-separated hex pattern, e.g. `"7F 23 03 D5 ?? 40"`.
    pub fn compile(spec: &str) -> Result<Pattern> {
        let mut bytes = Vec::new();
        let mut mask = Vec::new();
        for token in spec.split_whitespace() {
            if token == "??" {
                bytes.push(0);
                mask.push(false);
                continue;
            }
            let value = u8::from_str_radix(token, 16)
                .map_err(|_| Error::PatternNotFound("invalid pattern byte"))?;
            bytes.push(value);
            mask.push(true);
        }
        if bytes.is_empty() {
            return Err(Error::PatternNotFound("empty pattern"));
        }
        Ok(Pattern { bytes, mask })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn matches_at(&self, haystack: &[u8], at: usize) -> bool {
        if at + self.bytes.len() > haystack.len() {
            return false;
        }
        self.bytes
            .iter()
            .zip(&self.mask)
            .enumerate()
            .all(|(i, (b, significant))| !significant || haystack[at + i] == *b)
    }

    /// Offset of the first match.
    pub fn find(&self, haystack: &[u8]) -> Option<usize> {
        if haystack.len() < self.bytes.len() {
            return None;
        }
        (0..=haystack.len() - self.bytes.len()).find(|at| self.matches_at(haystack, *at))
    }
}
