//! Size-preserving in-place string rewrites.

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::memory::{protect, ProcessMemory};
use crate::scan::TextEncoding;

/// Rewrite the string at `address` from `original` to `replacement`.
///
/// The replacement must fit in the original's encoded span; the tail is
/// padded with spaces so the string keeps its length for any consumer that
/// measures it, and allocation boundaries are never moved. The span is
/// re-protected writable for the duration of the write and the prior
/// protection is restored whether or not the write succeeded.
///
/// There is no synchronization with the target: the write is best-effort and
/// the target may be reading the bytes mid-rewrite.
pub fn patch<P: ProcessMemory>(
    process: &mut P,
    address: u64,
    original: &str,
    replacement: &str,
    encoding: TextEncoding,
) -> Result<()> {
    let original_bytes = encoding.encode(original);
    let replacement_bytes = encoding.encode(replacement);

    if replacement_bytes.len() > original_bytes.len() {
        return Err(Error::ReplacementTooLong {
            original: original_bytes.len() / encoding.unit(),
            replacement: replacement_bytes.len() / encoding.unit(),
        });
    }

    let span = original_bytes.len();
    let prior = process
        .set_protection(address, span, protect::EXECUTE_READWRITE)
        .map_err(|e| Error::region_unwritable(address, e.to_string()))?;

    let mut scratch = Vec::with_capacity(span);
    scratch.extend_from_slice(&replacement_bytes);
    while scratch.len() < span {
        scratch.extend_from_slice(encoding.space());
    }

    let outcome = match process.write_bytes(address, &scratch) {
        Ok(written) if written == span => {
            debug!(
                "patched {:#x}: {:?} -> {:?} ({} bytes, {})",
                address, original, replacement, span, encoding
            );
            Ok(())
        }
        Ok(written) => Err(Error::WriteIncomplete {
            address,
            written,
            expected: span,
        }),
        Err(e) => Err(e),
    };

    // Restore must happen on every path and never masks the write result.
    if let Err(e) = process.set_protection(address, span, prior) {
        warn!("failed to restore protection at {:#x}: {}", address, e);
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MockProcessBuilder;
    use crate::scan::find_text;

    fn wide_region(text: &str, at: usize, size: usize) -> Vec<u8> {
        let mut data = vec![0u8; size];
        let encoded: Vec<u8> = text
            .encode_utf16()
            .chain(std::iter::once(0))
            .flat_map(|u| u.to_le_bytes())
            .collect();
        data[at..at + encoded.len()].copy_from_slice(&encoded);
        data
    }

    #[test]
    fn test_wide_patch_pads_with_spaces_and_keeps_null() {
        let mut process = MockProcessBuilder::new()
            .region(0x10000, wide_region("Start Game", 0x1000, 0x2000), protect::READWRITE)
            .build();

        patch(&mut process, 0x11000, "Start Game", "Inizia", TextEncoding::Wide).unwrap();

        let expected: Vec<u8> = "Inizia    "
            .encode_utf16()
            .chain(std::iter::once(0))
            .flat_map(|u| u.to_le_bytes())
            .collect();
        assert_eq!(process.bytes_at(0x11000, expected.len()), &expected[..]);
    }

    #[test]
    fn test_equal_length_patch_replaces_exactly() {
        let mut data = vec![0u8; 0x100];
        data[0x40..0x42].copy_from_slice(b"OK");
        let mut process = MockProcessBuilder::new()
            .region(0x1000, data, protect::READWRITE)
            .build();

        patch(&mut process, 0x1040, "OK", "OK", TextEncoding::Narrow).unwrap();
        assert_eq!(process.bytes_at(0x1040, 2), b"OK");
    }

    #[test]
    fn test_one_shorter_gets_one_space() {
        let mut data = vec![0u8; 0x20];
        data[..3].copy_from_slice(b"Yes");
        let mut process = MockProcessBuilder::new()
            .region(0x1000, data, protect::READWRITE)
            .build();

        patch(&mut process, 0x1000, "Yes", "Si", TextEncoding::Narrow).unwrap();
        assert_eq!(process.bytes_at(0x1000, 3), b"Si ");
    }

    #[test]
    fn test_replacement_too_long_is_rejected() {
        let mut data = vec![0u8; 0x20];
        data[..2].copy_from_slice(b"Hi");
        let mut process = MockProcessBuilder::new()
            .region(0x1000, data, protect::READWRITE)
            .build();

        let err = patch(&mut process, 0x1000, "Hi", "Ciao", TextEncoding::Narrow).unwrap_err();
        assert!(matches!(err, Error::ReplacementTooLong { original: 2, replacement: 4 }));
        assert_eq!(process.bytes_at(0x1000, 2), b"Hi");
    }

    #[test]
    fn test_protection_elevated_and_restored() {
        let mut data = vec![0u8; 0x20];
        data[..4].copy_from_slice(b"Menu");
        let mut process = MockProcessBuilder::new()
            .region(0x1000, data, protect::READONLY)
            .build();

        // Read-only region: the bracketing elevation makes the write land.
        patch(&mut process, 0x1000, "Menu", "Men", TextEncoding::Narrow).unwrap();
        assert_eq!(process.bytes_at(0x1000, 4), b"Men ");
        assert_eq!(process.query(0x1000).unwrap().protect, protect::READONLY);
    }

    #[test]
    fn test_patch_then_rescan_finds_replacement() {
        let mut process = MockProcessBuilder::new()
            .region(0x10000, wide_region("Start Game", 0x1000, 0x2000), protect::READWRITE)
            .build();

        patch(&mut process, 0x11000, "Start Game", "Inizia", TextEncoding::Wide).unwrap();

        let snapshot = process.read_bytes(0x10000, 0x2000).unwrap();
        let matches = find_text(&snapshot, 0x10000, "Inizia", TextEncoding::Wide);
        assert!(matches.contains(&0x11000));
    }
}
