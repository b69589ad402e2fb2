//! Signature Loading
//!
//! Parses the newline-delimited `id:pattern` signature format. Patterns are
//! either literal ASCII or `0x`-prefixed hex. Malformed lines are skipped
//! with a warning; a bad line never fails the load.

use crate::{DpiError, Result};
use std::io::BufRead;
use std::path::Path;

/// A single inspection signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Signature ID reported in verdicts
    pub id: u32,
    /// Raw byte pattern matched against packet payloads
    pub pattern: Vec<u8>,
}

/// Load totals
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadStats {
    pub loaded: usize,
    pub skipped: usize,
}

/// Load signatures from any line source
///
/// `#`-prefixed lines and blank lines are ignored.
pub fn load_signatures<R: BufRead>(reader: R) -> Result<(Vec<Signature>, LoadStats)> {
    let mut signatures = Vec::new();
    let mut stats = LoadStats::default();

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match parse_line(line) {
            Some(sig) => {
                signatures.push(sig);
                stats.loaded += 1;
            }
            None => {
                tracing::warn!(line = lineno + 1, content = line, "skipping malformed signature line");
                stats.skipped += 1;
            }
        }
    }

    Ok((signatures, stats))
}

/// Load signatures from a file path
pub fn load_signature_file(path: &Path) -> Result<(Vec<Signature>, LoadStats)> {
    let file = std::fs::File::open(path)
        .map_err(|e| DpiError::Config(format!("{}: {}", path.display(), e)))?;
    load_signatures(std::io::BufReader::new(file))
}

fn parse_line(line: &str) -> Option<Signature> {
    let (id, rest) = line.split_once(':')?;
    let id: u32 = id.trim().parse().ok()?;

    let pattern = if let Some(hex_body) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        hex::decode(hex_body).ok()?
    } else {
        rest.as_bytes().to_vec()
    };

    // An empty pattern would match at every offset.
    if pattern.is_empty() {
        return None;
    }

    Some(Signature { id, pattern })
}
