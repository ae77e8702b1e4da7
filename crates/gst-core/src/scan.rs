//! Pattern scanning over region snapshots.
//!
//! Scans operate on a snapshot (`&[u8]` plus its base address) rather than a
//! live process, so a read retry never restarts a half-finished search. The
//! scanner reports candidate addresses only; whether they are writable is the
//! patcher's problem.

use encoding_rs::WINDOWS_1252;
use strum::Display;

use crate::error::{Error, Result};

/// String encoding of a scan or patch target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TextEncoding {
    /// Single-byte text (WINDOWS_1252 superset of ASCII).
    #[strum(serialize = "ASCII")]
    Narrow,
    /// UTF-16LE code units.
    #[strum(serialize = "UTF-16")]
    Wide,
}

impl TextEncoding {
    /// Size of one code unit in bytes.
    pub fn unit(&self) -> usize {
        match self {
            TextEncoding::Narrow => 1,
            TextEncoding::Wide => 2,
        }
    }

    /// Encode `text` into this encoding's byte representation.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            TextEncoding::Narrow => {
                let (bytes, _, _) = WINDOWS_1252.encode(text);
                bytes.into_owned()
            }
            TextEncoding::Wide => text
                .encode_utf16()
                .flat_map(|unit| unit.to_le_bytes())
                .collect(),
        }
    }

    /// The encoded space character, used for padding.
    pub fn space(&self) -> &'static [u8] {
        match self {
            TextEncoding::Narrow => &[0x20],
            TextEncoding::Wide => &[0x20, 0x00],
        }
    }

    /// Length of `text` in code units.
    pub fn unit_len(&self, text: &str) -> usize {
        self.encode(text).len() / self.unit()
    }
}

/// Find every occurrence of `needle` in the snapshot.
///
/// Returned addresses are absolute (snapshot base + offset). Wide scans only
/// report offsets aligned to the code-unit size. Matches do not overlap: the
/// search resumes past each match.
pub fn find_text(snapshot: &[u8], base: u64, needle: &str, encoding: TextEncoding) -> Vec<u64> {
    let pattern = encoding.encode(needle);
    if pattern.is_empty() || snapshot.len() < pattern.len() {
        return Vec::new();
    }

    let unit = encoding.unit();
    let mut matches = Vec::new();
    let mut offset = 0usize;
    let last = snapshot.len() - pattern.len();

    while offset <= last {
        if snapshot[offset..offset + pattern.len()] == pattern[..] {
            matches.push(base + offset as u64);
            offset += pattern.len();
        } else {
            offset += unit;
        }
    }

    matches
}

/// Find every position matching `(bytes, mask)`, where `mask` is a string of
/// `x` (byte must match) and `?` (wildcard) with one character per byte.
///
/// The mask-string form is the protocol with external callers; internally it
/// lowers to the same wildcard representation code signatures use.
pub fn find_masked(snapshot: &[u8], base: u64, bytes: &[u8], mask: &str) -> Result<Vec<u64>> {
    let pattern = mask_to_pattern(bytes, mask)?;
    Ok(find_wildcard(snapshot, base, &pattern))
}

/// Lower a `(bytes, mask)` pair into the wildcard representation.
pub fn mask_to_pattern(bytes: &[u8], mask: &str) -> Result<Vec<Option<u8>>> {
    if mask.len() != bytes.len() {
        return Err(Error::InvalidPattern(format!(
            "mask length {} does not match pattern length {}",
            mask.len(),
            bytes.len()
        )));
    }

    let mut pattern = Vec::with_capacity(bytes.len());
    for (byte, flag) in bytes.iter().zip(mask.chars()) {
        match flag {
            'x' | 'X' => pattern.push(Some(*byte)),
            '?' => pattern.push(None),
            other => {
                return Err(Error::InvalidPattern(format!(
                    "mask character '{}' is not 'x' or '?'",
                    other
                )))
            }
        }
    }

    Ok(pattern)
}

/// Find every position matching a wildcard pattern.
pub fn find_wildcard(snapshot: &[u8], base: u64, pattern: &[Option<u8>]) -> Vec<u64> {
    if pattern.is_empty() || snapshot.len() < pattern.len() {
        return Vec::new();
    }

    let mut matches = Vec::new();
    let last = snapshot.len() - pattern.len();

    'outer: for i in 0..=last {
        for (j, byte) in pattern.iter().enumerate() {
            if let Some(value) = byte {
                if snapshot[i + j] != *value {
                    continue 'outer;
                }
            }
        }
        matches.push(base + i as u64);
    }

    matches
}

/// Parse a signature pattern string of hex tokens with `??` wildcards,
/// e.g. `"48 89 5C 24 ?? 57"`.
pub fn parse_pattern(pattern: &str) -> Result<Vec<Option<u8>>> {
    let mut bytes = Vec::new();
    for token in pattern.split_whitespace() {
        if token == "??" || token == "?" {
            bytes.push(None);
            continue;
        }

        let value = u8::from_str_radix(token, 16).map_err(|e| {
            Error::InvalidPattern(format!("invalid signature token '{}': {}", token, e))
        })?;
        bytes.push(Some(value));
    }

    if bytes.is_empty() {
        return Err(Error::InvalidPattern("signature pattern is empty".to_string()));
    }

    Ok(bytes)
}

pub fn format_pattern(bytes: &[Option<u8>]) -> String {
    bytes
        .iter()
        .map(|b| match b {
            Some(value) => format!("{:02X}", value),
            None => "??".to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wide_bytes(text: &str) -> Vec<u8> {
        TextEncoding::Wide.encode(text)
    }

    #[test]
    fn test_narrow_scan_finds_all_occurrences() {
        let mut snapshot = vec![0u8; 0x100];
        snapshot[0x40..0x42].copy_from_slice(b"OK");
        snapshot[0x80..0x82].copy_from_slice(b"OK");

        let matches = find_text(&snapshot, 0x1000, "OK", TextEncoding::Narrow);
        assert_eq!(matches, vec![0x1040, 0x1080]);
    }

    #[test]
    fn test_wide_scan_alignment() {
        let mut snapshot = vec![0u8; 0x80];
        let needle = wide_bytes("Start Game");
        snapshot[0x10..0x10 + needle.len()].copy_from_slice(&needle);
        // Same bytes at an odd offset must not be reported.
        snapshot[0x41..0x41 + needle.len()].copy_from_slice(&needle);

        let matches = find_text(&snapshot, 0x2000, "Start Game", TextEncoding::Wide);
        assert_eq!(matches, vec![0x2010]);
        for address in &matches {
            assert_eq!((address - 0x2000) % 2, 0);
        }
    }

    #[test]
    fn test_matches_do_not_overlap() {
        let snapshot = b"aaaa".to_vec();
        let matches = find_text(&snapshot, 0, "aa", TextEncoding::Narrow);
        assert_eq!(matches, vec![0, 2]);
    }

    #[test]
    fn test_empty_needle_returns_empty() {
        let snapshot = vec![1u8, 2, 3];
        assert!(find_text(&snapshot, 0, "", TextEncoding::Narrow).is_empty());
        assert!(find_text(&snapshot, 0, "", TextEncoding::Wide).is_empty());
    }

    #[test]
    fn test_needle_longer_than_snapshot() {
        let snapshot = vec![0u8; 4];
        assert!(find_text(&snapshot, 0, "longer than this", TextEncoding::Narrow).is_empty());
    }

    #[test]
    fn test_masked_scan() {
        let snapshot = vec![0x48, 0x89, 0x5C, 0x24, 0x10, 0x57, 0x48, 0x89, 0x5C, 0x24, 0x18];
        let matches = find_masked(&snapshot, 0, &[0x48, 0x89, 0x5C, 0x24, 0x00], "xxxx?").unwrap();
        assert_eq!(matches, vec![0, 6]);
    }

    #[test]
    fn test_masked_scan_rejects_length_mismatch() {
        assert!(find_masked(&[0u8; 8], 0, &[0x48, 0x89], "x").is_err());
        assert!(find_masked(&[0u8; 8], 0, &[0x48], "y").is_err());
    }

    #[test]
    fn test_parse_pattern_roundtrip() {
        let parsed = parse_pattern("48 89 5C 24 ?? 57").unwrap();
        assert_eq!(parsed.len(), 6);
        assert_eq!(parsed[0], Some(0x48));
        assert_eq!(parsed[4], None);
        assert_eq!(format_pattern(&parsed), "48 89 5C 24 ?? 57");
    }

    #[test]
    fn test_parse_pattern_rejects_garbage() {
        assert!(parse_pattern("").is_err());
        assert!(parse_pattern("GG").is_err());
    }

    #[test]
    fn test_encoding_units() {
        assert_eq!(TextEncoding::Narrow.unit(), 1);
        assert_eq!(TextEncoding::Wide.unit(), 2);
        assert_eq!(TextEncoding::Wide.unit_len("Ciao"), 4);
        assert_eq!(TextEncoding::Wide.space(), &[0x20, 0x00]);
    }
}
