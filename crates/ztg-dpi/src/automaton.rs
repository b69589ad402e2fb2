//! Pattern Automaton
//!
//! Immutable multi-pattern matcher built once from a signature set. The
//! default build compiles an Aho-Corasick automaton; with the `aho` feature
//! disabled (or if automaton construction fails) a naive per-signature scan
//! is used instead. Both paths report the same `(sid, start, end)` match set
//! for any input, in the same canonical order.

use crate::signatures::Signature;

#[cfg(feature = "aho")]
use aho_corasick::AhoCorasick;

/// A single pattern hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SigMatch {
    /// Signature ID
    pub sid: u32,
    /// Match start offset
    pub start: usize,
    /// Match end offset (exclusive)
    pub end: usize,
}

/// Immutable multi-pattern matcher
///
/// Read-only after construction; share it behind an `Arc` without locking.
pub struct PatternAutomaton {
    signatures: Vec<Signature>,
    #[cfg(feature = "aho")]
    automaton: Option<AhoCorasick>,
}

impl PatternAutomaton {
    /// Build a matcher from a signature set
    ///
    /// Empty patterns are dropped with a warning; they would match at every
    /// offset.
    pub fn build(signatures: Vec<Signature>) -> Self {
        let signatures: Vec<Signature> = signatures
            .into_iter()
            .filter(|s| {
                if s.pattern.is_empty() {
                    tracing::warn!(sid = s.id, "dropping empty signature pattern");
                    false
                } else {
                    true
                }
            })
            .collect();

        #[cfg(feature = "aho")]
        let automaton = if signatures.is_empty() {
            None
        } else {
            match AhoCorasick::new(signatures.iter().map(|s| s.pattern.as_slice())) {
                Ok(ac) => Some(ac),
                Err(e) => {
                    tracing::warn!(error = %e, "automaton build failed, using naive scan");
                    None
                }
            }
        };

        Self {
            signatures,
            #[cfg(feature = "aho")]
            automaton,
        }
    }

    /// Find every signature occurrence in `haystack`
    ///
    /// Overlapping matches are reported. Results are sorted by
    /// `(start, end, sid)`.
    pub fn find(&self, haystack: &[u8]) -> Vec<SigMatch> {
        #[cfg(feature = "aho")]
        if let Some(ref ac) = self.automaton {
            let mut matches: Vec<SigMatch> = ac
                .find_overlapping_iter(haystack)
                .map(|m| SigMatch {
                    sid: self.signatures[m.pattern().as_usize()].id,
                    start: m.start(),
                    end: m.end(),
                })
                .collect();
            matches.sort_unstable_by_key(|m| (m.start, m.end, m.sid));
            return matches;
        }

        self.find_naive(haystack)
    }

    /// Brute-force reference scan
    ///
    /// Correct for any input; the automaton path must agree with it exactly.
    pub fn find_naive(&self, haystack: &[u8]) -> Vec<SigMatch> {
        let mut matches = Vec::new();

        for sig in &self.signatures {
            let plen = sig.pattern.len();
            if plen == 0 || plen > haystack.len() {
                continue;
            }
            for start in 0..=haystack.len() - plen {
                if &haystack[start..start + plen] == sig.pattern.as_slice() {
                    matches.push(SigMatch { sid: sig.id, start, end: start + plen });
                }
            }
        }

        matches.sort_unstable_by_key(|m| (m.start, m.end, m.sid));
        matches
    }

    /// Signatures backing this matcher
    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    /// Number of compiled signatures
    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    /// True if no signatures are loaded
    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}
