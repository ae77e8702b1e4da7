//! The orchestrator-facing API: locate strings in a target, rewrite them in
//! place, and report what was patched.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::memory::{scannable_regions, ProcessMemory};
use crate::patch::patch;
use crate::process::ProcessHandle;
use crate::scan::{find_text, find_wildcard, mask_to_pattern, TextEncoding};

pub use crate::process::{get_process_modules, has_admin_privileges, is_process_64_bit};

/// One `(original, translated)` pair supplied by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationPair {
    pub original: String,
    pub translated: String,
}

/// One successfully patched string.
#[derive(Debug, Clone, Serialize)]
pub struct InjectedString {
    pub address: u64,
    pub original: String,
    pub translated: String,
    /// `"UTF-16"` or `"ASCII"`.
    pub encoding: String,
}

/// Result of an injection sweep. Failed pairs are reported by omission: only
/// successful patches appear in `injected`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InjectionReport {
    pub success: bool,
    pub injected_count: usize,
    pub injected: Vec<InjectedString>,
}

/// One byte-pattern scan hit.
#[derive(Debug, Clone, Serialize)]
pub struct ScanHit {
    pub address: u64,
    pub region: u64,
    pub size: u64,
}

/// Sweep the target for each pair's original text in both encodings and
/// rewrite every occurrence in place.
///
/// A region that fails to read is skipped; a pair whose replacement does not
/// fit fails per-occurrence and is simply absent from the report.
pub fn inject_translations_into<P: ProcessMemory>(
    process: &mut P,
    pairs: &[TranslationPair],
) -> InjectionReport {
    let mut report = InjectionReport {
        success: true,
        ..Default::default()
    };

    let regions: Vec<_> = scannable_regions(process).collect();
    info!(
        "injection sweep over {} regions for {} pairs",
        regions.len(),
        pairs.len()
    );

    for region in regions {
        let snapshot = match process.read_bytes(region.base, region.size as usize) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                debug!("skipping region {:#x}: {}", region.base, e);
                continue;
            }
        };

        for pair in pairs {
            for encoding in [TextEncoding::Wide, TextEncoding::Narrow] {
                for address in find_text(&snapshot, region.base, &pair.original, encoding) {
                    match patch(process, address, &pair.original, &pair.translated, encoding) {
                        Ok(()) => report.injected.push(InjectedString {
                            address,
                            original: pair.original.clone(),
                            translated: pair.translated.clone(),
                            encoding: encoding.to_string(),
                        }),
                        Err(e) => {
                            debug!("patch at {:#x} not applied: {}", address, e);
                        }
                    }
                }
            }
        }
    }

    report.injected_count = report.injected.len();
    report
}

/// Scan the target for a `(bytes, mask)` pattern across every scannable
/// region.
pub fn scan_memory_in<P: ProcessMemory>(
    process: &P,
    bytes: &[u8],
    mask: &str,
) -> Result<Vec<ScanHit>> {
    let pattern = mask_to_pattern(bytes, mask)?;
    let mut hits = Vec::new();

    for region in scannable_regions(process) {
        let snapshot = match process.read_bytes(region.base, region.size as usize) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                debug!("skipping region {:#x}: {}", region.base, e);
                continue;
            }
        };

        for address in find_wildcard(&snapshot, region.base, &pattern) {
            hits.push(ScanHit {
                address,
                region: region.base,
                size: region.size,
            });
        }
    }

    Ok(hits)
}

/// Open `pid` and run an injection sweep.
pub fn inject_translations(pid: u32, pairs: &[TranslationPair]) -> Result<InjectionReport> {
    let mut process = ProcessHandle::open(pid)?;
    Ok(inject_translations_into(&mut process, pairs))
}

/// Open `pid` read-only and run a pattern scan.
pub fn scan_memory(pid: u32, bytes: &[u8], mask: &str) -> Result<Vec<ScanHit>> {
    let process = ProcessHandle::open_read(pid)?;
    scan_memory_in(&process, bytes, mask)
}

/// Read raw bytes from the target.
pub fn read_memory(pid: u32, address: u64, size: usize) -> Result<Vec<u8>> {
    let process = ProcessHandle::open_read(pid)?;
    process.read_bytes(address, size)
}

/// Write raw bytes into the target; true when the whole buffer transferred.
pub fn write_memory(pid: u32, address: u64, bytes: &[u8]) -> Result<bool> {
    let mut process = ProcessHandle::open(pid)?;
    let span = bytes.len();
    let prior = process.set_protection(address, span, crate::memory::protect::EXECUTE_READWRITE)?;
    let written = process.write_bytes(address, bytes);
    if let Err(e) = process.set_protection(address, span, prior) {
        tracing::warn!("failed to restore protection at {:#x}: {}", address, e);
    }
    Ok(written? == span)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{protect, MockProcessBuilder};

    fn pair(original: &str, translated: &str) -> TranslationPair {
        TranslationPair {
            original: original.to_string(),
            translated: translated.to_string(),
        }
    }

    fn wide_with_null(text: &str) -> Vec<u8> {
        text.encode_utf16()
            .chain(std::iter::once(0))
            .flat_map(|u| u.to_le_bytes())
            .collect()
    }

    #[test]
    fn test_wide_pair_is_found_and_padded() {
        let mut data = vec![0u8; 0x2000];
        let encoded = wide_with_null("Start Game");
        data[0x1000..0x1000 + encoded.len()].copy_from_slice(&encoded);

        let mut process = MockProcessBuilder::new()
            .region(0x40_0000, data, protect::READWRITE)
            .build();

        let report = inject_translations_into(&mut process, &[pair("Start Game", "Inizia")]);

        assert!(report.success);
        assert_eq!(report.injected_count, 1);
        assert_eq!(report.injected[0].address, 0x40_1000);
        assert_eq!(report.injected[0].encoding, "UTF-16");

        let expected = wide_with_null("Inizia    ");
        assert_eq!(process.bytes_at(0x40_1000, expected.len()), &expected[..]);
    }

    #[test]
    fn test_narrow_pair_patched_at_every_occurrence() {
        let mut data = vec![0u8; 0x100];
        data[0x40..0x42].copy_from_slice(b"OK");
        data[0x80..0x82].copy_from_slice(b"OK");

        let mut process = MockProcessBuilder::new()
            .region(0x1000, data, protect::READWRITE)
            .build();

        let report = inject_translations_into(&mut process, &[pair("OK", "OK")]);

        assert_eq!(report.injected_count, 2);
        let addresses: Vec<u64> = report.injected.iter().map(|i| i.address).collect();
        assert_eq!(addresses, vec![0x1040, 0x1080]);
        assert_eq!(process.bytes_at(0x1040, 2), b"OK");
        assert_eq!(process.bytes_at(0x1080, 2), b"OK");
    }

    #[test]
    fn test_too_long_replacement_is_omitted_from_report() {
        let mut data = vec![0u8; 0x100];
        data[0x10..0x12].copy_from_slice(b"Hi");

        let mut process = MockProcessBuilder::new()
            .region(0x1000, data, protect::READWRITE)
            .build();

        let report = inject_translations_into(&mut process, &[pair("Hi", "Ciao")]);

        assert!(report.success);
        assert_eq!(report.injected_count, 0);
        assert!(report.injected.is_empty());
        assert_eq!(process.bytes_at(0x1010, 2), b"Hi");
    }

    #[test]
    fn test_unreadable_region_does_not_abort_sweep() {
        let mut data = vec![0u8; 0x100];
        data[0x20..0x26].copy_from_slice(b"Resume");

        let mut process = MockProcessBuilder::new()
            .unreadable_region(0x1000, 0x1000)
            .region(0x4000, data, protect::READWRITE)
            .build();

        let report = inject_translations_into(&mut process, &[pair("Resume", "Riprendi")]);
        // "Riprendi" does not fit "Resume"; nothing is injected, but the
        // second region was still visited.
        assert_eq!(report.injected_count, 0);

        let report = inject_translations_into(&mut process, &[pair("Resume", "Via")]);
        assert_eq!(report.injected_count, 1);
        assert_eq!(report.injected[0].address, 0x4020);
        assert_eq!(report.injected[0].encoding, "ASCII");
    }

    #[test]
    fn test_scan_memory_reports_region_and_size() {
        let mut data = vec![0u8; 0x200];
        data[0x100..0x105].copy_from_slice(&[0x48, 0x89, 0x5C, 0x24, 0x10]);

        let process = MockProcessBuilder::new()
            .region(0x7000, data, protect::EXECUTE_READ)
            .build();

        let hits = scan_memory_in(&process, &[0x48, 0x89, 0x5C, 0x24, 0x00], "xxxx?").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].address, 0x7100);
        assert_eq!(hits[0].region, 0x7000);
        assert_eq!(hits[0].size, 0x200);
    }

    #[test]
    fn test_scan_memory_rejects_bad_mask_upfront() {
        let process = MockProcessBuilder::new()
            .region(0x1000, vec![0u8; 0x10], protect::READONLY)
            .build();
        assert!(scan_memory_in(&process, &[0x48], "xx").is_err());
    }
}
