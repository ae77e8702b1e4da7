//! Unreal Engine text interception: version detection, function location,
//! and the `FText::ToString` / `UTextBlock::SetText` detours.

use std::path::Path;

use strum::Display;
use tracing::debug;

use gst_core::signature::{HookSignature, HookSignatureSet};

use crate::context;
use crate::filter;

/// Engine generations with distinct function signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum UnrealVersion {
    #[strum(serialize = "UE4.27")]
    Ue4_27,
    #[strum(serialize = "UE5")]
    Ue5,
    #[strum(serialize = "Unknown")]
    Unknown,
}

impl UnrealVersion {
    /// Signature-table key for this version.
    pub fn key(&self) -> &'static str {
        match self {
            UnrealVersion::Ue4_27 => "UE4.27",
            UnrealVersion::Ue5 => "UE5",
            UnrealVersion::Unknown => "Unknown",
        }
    }
}

/// Detect the engine generation from the game directory.
///
/// UE5 ships `Engine/Binaries/Win64/UnrealEditor-Core.dll` alongside packaged
/// editor builds; otherwise DLL names carrying `UE5`/`UE4` decide. An
/// undetectable layout is treated as UE4.27, the most common target.
pub fn detect_version(game_dir: &Path) -> UnrealVersion {
    if game_dir
        .join("Engine")
        .join("Binaries")
        .join("Win64")
        .join("UnrealEditor-Core.dll")
        .is_file()
    {
        return UnrealVersion::Ue5;
    }

    if let Ok(entries) = std::fs::read_dir(game_dir) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.to_ascii_lowercase().ends_with(".dll") {
                continue;
            }
            if name.contains("UE5") {
                return UnrealVersion::Ue5;
            }
            if name.contains("UE4") {
                return UnrealVersion::Ue4_27;
            }
        }
    }

    debug!("no version marker found in {}, assuming UE4.27", game_dir.display());
    UnrealVersion::Ue4_27
}

/// Built-in signatures for the hooked entry points, by engine version.
pub fn default_signatures() -> HookSignatureSet {
    HookSignatureSet {
        signatures: vec![
            HookSignature {
                name: "FText::ToString".to_string(),
                version: "UE4.27".to_string(),
                patterns: vec![
                    "48 89 5C 24 ?? 48 89 74 24 ?? 57 48 83 EC ?? 48 8B FA 48 8B F1".to_string(),
                ],
            },
            HookSignature {
                name: "FText::ToString".to_string(),
                version: "UE5".to_string(),
                patterns: vec!["40 53 48 83 EC ?? 48 8B D9 48 85 C9 74 ?? 48 8B 01".to_string()],
            },
            HookSignature {
                name: "UTextBlock::SetText".to_string(),
                version: "UE4.27".to_string(),
                patterns: vec![
                    "48 89 5C 24 ?? 57 48 83 EC ?? 48 8B DA 48 8B F9 E8".to_string(),
                ],
            },
            HookSignature {
                name: "UTextBlock::SetText".to_string(),
                version: "UE5".to_string(),
                patterns: vec!["48 89 5C 24 ?? 57 48 83 EC ?? 48 8B DA 48 8B F9 E8".to_string()],
            },
        ],
    }
}

/// Unreal's string container: a wide buffer with a used length (including
/// the terminator) and a capacity, both in code units.
#[repr(C)]
pub struct FString {
    pub data: *mut u16,
    pub num: i32,
    pub max: i32,
}

impl FString {
    /// Characters excluding the terminator.
    pub fn len(&self) -> usize {
        if self.num > 0 {
            self.num as usize - 1
        } else {
            0
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy the contents out as a Rust string.
    ///
    /// # Safety
    /// `data` must point at `num` valid code units (or be null).
    pub unsafe fn to_string_lossy(&self) -> String {
        if self.data.is_null() || self.num <= 0 {
            return String::new();
        }
        let units = std::slice::from_raw_parts(self.data, self.len());
        String::from_utf16_lossy(units)
    }
}

/// Rewrite an `FString` buffer in place with `translated`.
///
/// A translation shorter than the current text is padded with spaces so the
/// visible length never shrinks; a longer one is written whole when the
/// buffer's capacity allows. The length field is updated to the padded size.
/// Returns false (buffer untouched) when nothing fits.
///
/// # Safety
/// `out` must point at a live `FString` whose `data` has `max` writable code
/// units.
pub unsafe fn rewrite_fstring(out: *mut FString, translated: &str) -> bool {
    let string = &mut *out;
    if string.data.is_null() || string.max <= 0 {
        return false;
    }

    let original_len = string.len();
    let mut units: Vec<u16> = translated.encode_utf16().collect();
    while units.len() < original_len {
        units.push(0x20);
    }

    // Room for the text plus terminator, within the existing allocation.
    if units.len() + 1 > string.max as usize {
        return false;
    }

    let buffer = std::slice::from_raw_parts_mut(string.data, string.max as usize);
    buffer[..units.len()].copy_from_slice(&units);
    buffer[units.len()] = 0;
    string.num = units.len() as i32 + 1;
    true
}

pub type FTextToStringFn =
    unsafe extern "system" fn(this: *const core::ffi::c_void, out: *mut FString) -> *mut FString;

pub type UTextBlockSetTextFn =
    unsafe extern "system" fn(this: *mut core::ffi::c_void, text: *const core::ffi::c_void);

/// Detour for `FText::ToString`: call through, then translate the produced
/// string in place when the filter admits it.
///
/// # Safety
/// Installed over the real function; arguments follow the engine's ABI.
pub unsafe extern "system" fn ftext_to_string_detour(
    this: *const core::ffi::c_void,
    out: *mut FString,
) -> *mut FString {
    let Some(ctx) = context::get() else {
        return out;
    };
    let trampoline = ctx.unreal_to_string_trampoline();
    if trampoline == 0 {
        return out;
    }
    let original: FTextToStringFn = std::mem::transmute(trampoline as usize);
    let result = original(this, out);

    if result.is_null() {
        return result;
    }
    let text = (*result).to_string_lossy();
    if !filter::is_translatable(&text) {
        return result;
    }

    if let Some(translated) = ctx.translate_hooked(&text) {
        if !rewrite_fstring(result, &translated) {
            debug!("translation does not fit FString buffer, keeping original");
        }
    }
    result
}

/// Detour for `UTextBlock::SetText`: pass-through. Translation happens at
/// `FText::ToString`; this hook only keeps the widget path observable.
///
/// # Safety
/// Installed over the real function; arguments follow the engine's ABI.
pub unsafe extern "system" fn utextblock_set_text_detour(
    this: *mut core::ffi::c_void,
    text: *const core::ffi::c_void,
) {
    let Some(ctx) = context::get() else {
        return;
    };
    let trampoline = ctx.unreal_set_text_trampoline();
    if trampoline == 0 {
        return;
    }
    let original: UTextBlockSetTextFn = std::mem::transmute(trampoline as usize);
    original(this, text);
}

/// Locate an entry point by scanning a module's executable bytes with the
/// version-keyed signatures.
#[cfg(target_os = "windows")]
pub fn locate_entry_point(
    signatures: &HookSignatureSet,
    name: &str,
    version: UnrealVersion,
) -> Option<u64> {
    use gst_core::scan::find_wildcard;

    let patterns = signatures.patterns_for(name, version.key());
    if patterns.is_empty() {
        tracing::warn!("no {} signatures for {}", name, version);
        return None;
    }

    let (base, size) = main_module_bounds()?;
    // SAFETY: the main module's image is mapped for the process lifetime.
    let image = unsafe { std::slice::from_raw_parts(base as *const u8, size) };

    for pattern in patterns {
        let matches = find_wildcard(image, base, &pattern);
        if let Some(&address) = matches.first() {
            tracing::info!("{} located at {:#x} ({} candidates)", name, address, matches.len());
            return Some(address);
        }
    }

    tracing::warn!("{} not found in main module", name);
    None
}

#[cfg(target_os = "windows")]
fn main_module_bounds() -> Option<(u64, usize)> {
    use std::mem;
    use windows::Win32::System::LibraryLoader::GetModuleHandleW;
    use windows::Win32::System::ProcessStatus::{K32GetModuleInformation, MODULEINFO};
    use windows::Win32::System::Threading::GetCurrentProcess;

    // SAFETY: querying the current process's main module.
    let module = unsafe { GetModuleHandleW(None) }.ok()?;
    let mut info = MODULEINFO::default();
    // SAFETY: info is a valid out-struct of the declared size.
    let ok = unsafe {
        K32GetModuleInformation(
            GetCurrentProcess(),
            module,
            &mut info,
            mem::size_of::<MODULEINFO>() as u32,
        )
    };
    if !ok.as_bool() {
        return None;
    }
    Some((info.lpBaseOfDll as u64, info.SizeOfImage as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_version_ue5_editor_layout() {
        let dir = tempfile::tempdir().unwrap();
        let editor = dir.path().join("Engine").join("Binaries").join("Win64");
        std::fs::create_dir_all(&editor).unwrap();
        std::fs::write(editor.join("UnrealEditor-Core.dll"), b"").unwrap();

        assert_eq!(detect_version(dir.path()), UnrealVersion::Ue5);
    }

    #[test]
    fn test_detect_version_from_dll_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("UE4Game-Win64-Shipping.dll"), b"").unwrap();
        assert_eq!(detect_version(dir.path()), UnrealVersion::Ue4_27);

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("MyGame-UE5-Core.dll"), b"").unwrap();
        assert_eq!(detect_version(dir.path()), UnrealVersion::Ue5);
    }

    #[test]
    fn test_detect_version_defaults_to_ue4() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("game.exe"), b"").unwrap();
        assert_eq!(detect_version(dir.path()), UnrealVersion::Ue4_27);
    }

    #[test]
    fn test_default_signatures_parse() {
        let set = default_signatures();
        assert!(!set.patterns_for("FText::ToString", "UE4.27").is_empty());
        assert!(!set.patterns_for("FText::ToString", "UE5").is_empty());
        assert!(!set.patterns_for("UTextBlock::SetText", "UE4.27").is_empty());
    }

    fn fstring_with(text: &str, capacity: usize) -> (Vec<u16>, FString) {
        let mut buffer: Vec<u16> = text.encode_utf16().collect();
        let num = buffer.len() as i32 + 1;
        buffer.push(0);
        buffer.resize(capacity, 0);
        let string = FString {
            data: buffer.as_mut_ptr(),
            num,
            max: capacity as i32,
        };
        (buffer, string)
    }

    #[test]
    fn test_rewrite_shorter_pads_with_spaces() {
        let (buffer, mut string) = fstring_with("Start Game", 32);

        assert!(unsafe { rewrite_fstring(&mut string, "Inizia") });
        assert_eq!(unsafe { string.to_string_lossy() }, "Inizia    ");
        assert_eq!(string.num, 11);
        // Terminator right after the padded text.
        assert_eq!(buffer[10], 0);
    }

    #[test]
    fn test_rewrite_longer_uses_capacity() {
        let (_buffer, mut string) = fstring_with("Map", 32);

        assert!(unsafe { rewrite_fstring(&mut string, "Mappa del mondo") });
        assert_eq!(unsafe { string.to_string_lossy() }, "Mappa del mondo");
        assert_eq!(string.num, 16);
    }

    #[test]
    fn test_rewrite_that_does_not_fit_is_refused() {
        let (_buffer, mut string) = fstring_with("Hi", 4);

        assert!(!unsafe { rewrite_fstring(&mut string, "Ciao!") });
        assert_eq!(unsafe { string.to_string_lossy() }, "Hi");
        assert_eq!(string.num, 3);
    }
}
