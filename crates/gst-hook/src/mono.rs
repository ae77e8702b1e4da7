//! Mono runtime interception: export resolution and the managed-string
//! detours.
//!
//! Mono exports its embedding API by name, so no pattern scanning is needed;
//! the runtime DLL is `mono-2.0-bdwgc.dll` in current players and `mono.dll`
//! in older ones.

use std::ffi::c_void;

use tracing::debug;

use crate::context;
use crate::filter;

pub type MonoStringNewFn =
    unsafe extern "C" fn(domain: *mut c_void, text: *const i8) -> *mut c_void;

pub type MonoStringNewUtf16Fn =
    unsafe extern "C" fn(domain: *mut c_void, text: *const u16, len: i32) -> *mut c_void;

pub type MonoRuntimeInvokeFn = unsafe extern "C" fn(
    method: *mut c_void,
    obj: *mut c_void,
    params: *mut *mut c_void,
    exc: *mut *mut c_void,
) -> *mut c_void;

type MonoMethodGetNameFn = unsafe extern "C" fn(method: *mut c_void) -> *const i8;
type MonoMethodGetClassFn = unsafe extern "C" fn(method: *mut c_void) -> *mut c_void;
type MonoClassGetNameFn = unsafe extern "C" fn(class: *mut c_void) -> *const i8;

/// Resolved embedding API of the target's Mono runtime.
pub struct MonoApi {
    pub string_new: u64,
    pub string_new_utf16: u64,
    pub runtime_invoke: u64,
    method_get_name: Option<MonoMethodGetNameFn>,
    method_get_class: Option<MonoMethodGetClassFn>,
    class_get_name: Option<MonoClassGetNameFn>,
}

/// Method names that set user-visible text on a widget. Used only to
/// classify observed invocations.
pub fn is_set_text_method(name: &str) -> bool {
    name.contains("SetText")
        || name.contains("set_text")
        || name == "set_Text"
        || name == "SetCharArray"
}

#[cfg(target_os = "windows")]
pub fn resolve() -> Option<MonoApi> {
    use windows::core::{s, PCSTR};
    use windows::Win32::Foundation::HMODULE;
    use windows::Win32::System::LibraryLoader::{GetModuleHandleA, GetProcAddress};

    // SAFETY: plain module lookups by constant name.
    let module: HMODULE = unsafe {
        GetModuleHandleA(s!("mono-2.0-bdwgc.dll"))
            .or_else(|_| GetModuleHandleA(s!("mono.dll")))
            .ok()?
    };

    // SAFETY: module is a live runtime DLL; names are valid exports.
    let export = |name: PCSTR| -> Option<u64> {
        unsafe { GetProcAddress(module, name) }.map(|f| f as usize as u64)
    };

    let string_new = export(s!("mono_string_new"))?;
    let string_new_utf16 = export(s!("mono_string_new_utf16"))?;
    let runtime_invoke = export(s!("mono_runtime_invoke"))?;

    // SAFETY: transmuting resolved exports to their documented signatures.
    let api = unsafe {
        MonoApi {
            string_new,
            string_new_utf16,
            runtime_invoke,
            method_get_name: export(s!("mono_method_get_name"))
                .map(|f| std::mem::transmute::<usize, MonoMethodGetNameFn>(f as usize)),
            method_get_class: export(s!("mono_method_get_class"))
                .map(|f| std::mem::transmute::<usize, MonoMethodGetClassFn>(f as usize)),
            class_get_name: export(s!("mono_class_get_name"))
                .map(|f| std::mem::transmute::<usize, MonoClassGetNameFn>(f as usize)),
        }
    };

    tracing::info!("mono runtime resolved");
    Some(api)
}

#[cfg(not(target_os = "windows"))]
pub fn resolve() -> Option<MonoApi> {
    None
}

/// Whether a Mono runtime is loaded in this process.
#[cfg(target_os = "windows")]
pub fn is_present() -> bool {
    use windows::core::s;
    use windows::Win32::System::LibraryLoader::GetModuleHandleA;
    // SAFETY: plain module lookups by constant name.
    unsafe {
        GetModuleHandleA(s!("mono-2.0-bdwgc.dll")).is_ok() || GetModuleHandleA(s!("mono.dll")).is_ok()
    }
}

#[cfg(not(target_os = "windows"))]
pub fn is_present() -> bool {
    false
}

/// Detour for `mono_string_new`: translate UTF-8 string creation, building
/// the replacement through `mono_string_new_utf16` so the engine owns the
/// allocation.
///
/// # Safety
/// Installed over the real export; arguments follow Mono's embedding ABI.
pub unsafe extern "C" fn mono_string_new_detour(
    domain: *mut c_void,
    text: *const i8,
) -> *mut c_void {
    let Some(ctx) = context::get() else {
        return std::ptr::null_mut();
    };
    let trampoline = ctx.mono_string_new_trampoline();
    if trampoline == 0 {
        return std::ptr::null_mut();
    }
    let original: MonoStringNewFn = std::mem::transmute(trampoline as usize);

    if text.is_null() {
        return original(domain, text);
    }
    let Ok(utf8) = std::ffi::CStr::from_ptr(text).to_str() else {
        return original(domain, text);
    };
    if !filter::is_translatable(utf8) {
        return original(domain, text);
    }

    if let Some(translated) = ctx.translate_hooked(utf8) {
        let units: Vec<u16> = translated.encode_utf16().collect();
        // Build the replacement through the UTF-16 constructor's trampoline
        // so the engine owns the allocation and our own detour is bypassed.
        let utf16_trampoline = ctx.mono_string_new_utf16_trampoline();
        if !units.is_empty() && utf16_trampoline != 0 {
            let constructor: MonoStringNewUtf16Fn = std::mem::transmute(utf16_trampoline as usize);
            return constructor(domain, units.as_ptr(), units.len() as i32);
        }
    }

    original(domain, text)
}

/// Detour for `mono_string_new_utf16`: symmetric to the UTF-8 form.
///
/// # Safety
/// Installed over the real export; arguments follow Mono's embedding ABI.
pub unsafe extern "C" fn mono_string_new_utf16_detour(
    domain: *mut c_void,
    text: *const u16,
    len: i32,
) -> *mut c_void {
    let Some(ctx) = context::get() else {
        return std::ptr::null_mut();
    };
    let trampoline = ctx.mono_string_new_utf16_trampoline();
    if trampoline == 0 {
        return std::ptr::null_mut();
    }
    let original: MonoStringNewUtf16Fn = std::mem::transmute(trampoline as usize);

    if text.is_null() || len <= 0 {
        return original(domain, text, len);
    }
    let units = std::slice::from_raw_parts(text, len as usize);
    let utf8 = String::from_utf16_lossy(units);
    if !filter::is_translatable(&utf8) {
        return original(domain, text, len);
    }

    if let Some(translated) = ctx.translate_hooked(&utf8) {
        let units: Vec<u16> = translated.encode_utf16().collect();
        if !units.is_empty() {
            return original(domain, units.as_ptr(), units.len() as i32);
        }
    }

    original(domain, text, len)
}

/// Detour for `mono_runtime_invoke`: observation only. The call always goes
/// through unmodified; SetText-shaped method names bump a telemetry counter.
///
/// # Safety
/// Installed over the real export; arguments follow Mono's embedding ABI.
pub unsafe extern "C" fn mono_runtime_invoke_detour(
    method: *mut c_void,
    obj: *mut c_void,
    params: *mut *mut c_void,
    exc: *mut *mut c_void,
) -> *mut c_void {
    let Some(ctx) = context::get() else {
        return std::ptr::null_mut();
    };
    let trampoline = ctx.mono_runtime_invoke_trampoline();
    if trampoline == 0 {
        return std::ptr::null_mut();
    }
    let original: MonoRuntimeInvokeFn = std::mem::transmute(trampoline as usize);

    if !method.is_null() {
        if let Some(api) = ctx.mono_api() {
            if let Some(name) = api.method_name(method) {
                if is_set_text_method(&name) {
                    ctx.note_set_text_observed();
                    debug!("observed {}.{}", api.class_name(method).unwrap_or_default(), name);
                }
            }
        }
    }

    original(method, obj, params, exc)
}

impl MonoApi {
    /// Name of an invoked method, when the introspection exports resolved.
    /// `method` must come straight from the runtime.
    pub fn method_name(&self, method: *mut c_void) -> Option<String> {
        let getter = self.method_get_name?;
        // SAFETY: getter is the resolved export; method is a live handle.
        unsafe {
            let name = getter(method);
            if name.is_null() {
                return None;
            }
            Some(std::ffi::CStr::from_ptr(name).to_string_lossy().into_owned())
        }
    }

    /// Declaring class name of an invoked method.
    pub fn class_name(&self, method: *mut c_void) -> Option<String> {
        let get_class = self.method_get_class?;
        let get_name = self.class_get_name?;
        // SAFETY: both are resolved exports; method is a live handle.
        unsafe {
            let class = get_class(method);
            if class.is_null() {
                return None;
            }
            let name = get_name(class);
            if name.is_null() {
                return None;
            }
            Some(std::ffi::CStr::from_ptr(name).to_string_lossy().into_owned())
        }
    }
}
