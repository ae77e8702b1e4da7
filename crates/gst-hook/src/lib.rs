//! Injected translation module.
//!
//! Loaded into the target by the orchestrator, the module attaches trampoline
//! hooks to the engine's text APIs, filters intercepted strings, and
//! substitutes translations served from its cache or fetched from the
//! orchestrator over the named channel.

pub mod context;
pub mod engine;
pub mod filter;
pub mod mono;
pub mod relay;
pub mod unreal;

use strum::Display;

/// Which runtime this process hosts, deciding the hook set to arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum EngineKind {
    Unreal,
    Mono,
}

/// Probe the process: a loaded Mono runtime wins, anything else is treated
/// as an Unreal title.
pub fn detect_engine() -> EngineKind {
    if mono::is_present() {
        EngineKind::Mono
    } else {
        EngineKind::Unreal
    }
}

// ---------------------------------------------------------------------------
// Exports for orchestrator hotkeys and control.
// ---------------------------------------------------------------------------

#[no_mangle]
pub extern "system" fn ToggleTranslation() {
    if let Some(ctx) = context::get() {
        let enabled = ctx.pipeline().toggle_enabled();
        tracing::info!("translation toggled: {}", enabled);
    }
}

#[no_mangle]
pub extern "system" fn GetCacheSize() -> i32 {
    context::get()
        .map(|ctx| ctx.pipeline().cache_len() as i32)
        .unwrap_or(0)
}

#[no_mangle]
pub extern "system" fn ClearCache() {
    if let Some(ctx) = context::get() {
        ctx.pipeline().clear_cache();
    }
}

#[no_mangle]
pub extern "system" fn GST_IsActive() -> bool {
    context::get()
        .map(|ctx| ctx.pipeline().is_enabled())
        .unwrap_or(false)
}

#[no_mangle]
pub extern "system" fn GST_SetEnabled(enabled: bool) {
    if let Some(ctx) = context::get() {
        ctx.pipeline().set_enabled(enabled);
    }
}

/// Set the destination language from a nul-terminated UTF-16 string.
///
/// # Safety
/// `language` must be null or point at a nul-terminated UTF-16 string.
#[no_mangle]
pub unsafe extern "system" fn GST_SetTargetLanguage(language: *const u16) {
    if language.is_null() {
        return;
    }
    let Some(ctx) = context::get() else {
        return;
    };

    let mut len = 0usize;
    while *language.add(len) != 0 {
        len += 1;
    }
    let units = std::slice::from_raw_parts(language, len);
    let tag = String::from_utf16_lossy(units);
    ctx.pipeline().set_target_language(&tag);
}

/// Number of widget SetText-style invocations observed through the Mono
/// runtime hook.
#[no_mangle]
pub extern "system" fn GST_GetSetTextObserved() -> u64 {
    context::get()
        .map(|ctx| ctx.set_text_observed())
        .unwrap_or(0)
}

/// Report the request, cache-hit and error counters.
///
/// # Safety
/// Each out-pointer must be null or valid for a u64 write.
#[no_mangle]
pub unsafe extern "system" fn GST_GetStats(requests: *mut u64, hits: *mut u64, errors: *mut u64) {
    let stats = context::get()
        .map(|ctx| ctx.pipeline().stats())
        .unwrap_or_default();

    if !requests.is_null() {
        *requests = stats.total_requests;
    }
    if !hits.is_null() {
        *hits = stats.cache_hits;
    }
    if !errors.is_null() {
        *errors = stats.errors;
    }
}

// ---------------------------------------------------------------------------
// Module lifetime (Windows).
// ---------------------------------------------------------------------------

#[cfg(target_os = "windows")]
mod module {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use anyhow::{Context as _, Result};
    use tracing::{error, info, warn};

    use gst_core::config::TranslatorConfig;
    use gst_core::ipc::{self, pipe, Transport};
    use gst_core::signature::{load_signatures, HookSignatureSet};

    use crate::context::{self, ModuleContext};
    use crate::engine::{HookEngine, PlatformBackend};
    use crate::{detect_engine, mono, relay, unreal, EngineKind};

    pub(crate) static RUNNING: AtomicBool = AtomicBool::new(false);

    const CONFIG_FILE: &str = "gst_config.json";
    const SIGNATURE_FILE: &str = "gst_signatures.json";
    const CACHE_FILE: &str = "translations_cache.dat";

    /// Ticks of the 100 ms main loop between stats uploads.
    const STATS_INTERVAL_TICKS: u32 = 50;

    fn game_dir() -> PathBuf {
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn load_config(dir: &std::path::Path) -> TranslatorConfig {
        let path = dir.join(CONFIG_FILE);
        let mut config = match TranslatorConfig::load_from(&path) {
            Ok(config) => {
                info!("configuration loaded from {}", path.display());
                config
            }
            Err(_) => TranslatorConfig::default(),
        };
        if config.cache_enabled && config.cache_path.is_empty() {
            config.cache_path = dir.join(CACHE_FILE).to_string_lossy().to_string();
        }
        config
    }

    fn init_logging(dir: &std::path::Path) {
        use tracing_subscriber::prelude::*;

        let registry = tracing_subscriber::registry().with(relay::RelayLayer);

        let log_path = dir.join("gst_translator.log");
        match std::fs::File::options().create(true).append(true).open(&log_path) {
            Ok(file) => {
                let _ = registry
                    .with(
                        tracing_subscriber::fmt::layer()
                            .with_writer(std::sync::Mutex::new(file))
                            .with_ansi(false),
                    )
                    .try_init();
            }
            Err(_) => {
                let _ = registry.try_init();
            }
        }
    }

    fn connect_transport(ctx: &'static ModuleContext) -> bool {
        match pipe::connect(ipc::CHANNEL_NAME) {
            Ok((reader, writer)) => {
                let transport = Arc::new(Transport::new(reader, writer));
                transport.set_message_handler(|frame| {
                    if frame.message_type == gst_core::ipc::MessageType::ConfigUpdate {
                        if let (Some(ctx), Ok(json)) = (context::get(), frame.payload_text()) {
                            if let Err(e) = ctx.pipeline().apply_config_update(&json) {
                                warn!("bad config update: {}", e);
                            }
                        }
                    }
                });
                ctx.attach_transport(transport);
                true
            }
            Err(e) => {
                warn!("orchestrator channel unavailable: {}", e);
                false
            }
        }
    }

    fn signature_set(dir: &std::path::Path) -> HookSignatureSet {
        let mut signatures = unreal::default_signatures();
        let path = dir.join(SIGNATURE_FILE);
        if let Ok(loaded) = load_signatures(&path) {
            info!("signature overrides loaded from {}", path.display());
            signatures.override_with(loaded);
        }
        signatures
    }

    fn install_unreal_hooks(ctx: &'static ModuleContext, dir: &std::path::Path) -> Result<()> {
        let version = unreal::detect_version(dir);
        info!("unreal version: {}", version);
        let signatures = signature_set(dir);

        let mut engine = HookEngine::new(PlatformBackend::default());
        engine
            .initialize()
            .context("hook engine initialization failed")?;

        match unreal::locate_entry_point(&signatures, "FText::ToString", version) {
            Some(target) => {
                match engine.create(target, unreal::ftext_to_string_detour as usize as u64) {
                    Ok(trampoline) => {
                        ctx.set_unreal_to_string_trampoline(trampoline);
                        if let Err(e) = engine.enable(target) {
                            warn!("FText::ToString enable failed: {}", e);
                        }
                    }
                    Err(e) => warn!("FText::ToString install failed: {}", e),
                }
            }
            None => warn!("FText::ToString not found; translation hooks inactive"),
        }

        match unreal::locate_entry_point(&signatures, "UTextBlock::SetText", version) {
            Some(target) => {
                match engine.create(target, unreal::utextblock_set_text_detour as usize as u64) {
                    Ok(trampoline) => {
                        ctx.set_unreal_set_text_trampoline(trampoline);
                        if let Err(e) = engine.enable(target) {
                            warn!("UTextBlock::SetText enable failed: {}", e);
                        }
                    }
                    Err(e) => warn!("UTextBlock::SetText install failed: {}", e),
                }
            }
            None => info!("UTextBlock::SetText not found; widget path unobserved"),
        }

        ctx.adopt_engine(engine);
        Ok(())
    }

    fn install_mono_hooks(ctx: &'static ModuleContext) -> Result<()> {
        let api = mono::resolve().context("mono exports did not resolve")?;

        let mut engine = HookEngine::new(PlatformBackend::default());
        engine
            .initialize()
            .context("hook engine initialization failed")?;

        let hooks: [(&str, u64, u64, fn(&ModuleContext, u64)); 3] = [
            (
                "mono_string_new",
                api.string_new,
                mono::mono_string_new_detour as usize as u64,
                ModuleContext::set_mono_string_new_trampoline,
            ),
            (
                "mono_string_new_utf16",
                api.string_new_utf16,
                mono::mono_string_new_utf16_detour as usize as u64,
                ModuleContext::set_mono_string_new_utf16_trampoline,
            ),
            (
                "mono_runtime_invoke",
                api.runtime_invoke,
                mono::mono_runtime_invoke_detour as usize as u64,
                ModuleContext::set_mono_runtime_invoke_trampoline,
            ),
        ];

        ctx.set_mono_api(api);

        for (name, target, detour, store) in hooks {
            match engine.create(target, detour) {
                Ok(trampoline) => {
                    store(ctx, trampoline);
                    if let Err(e) = engine.enable(target) {
                        warn!("{} enable failed: {}", name, e);
                    } else {
                        info!("{} hooked", name);
                    }
                }
                Err(e) => warn!("{} install failed: {}", name, e),
            }
        }

        ctx.adopt_engine(engine);
        Ok(())
    }

    pub(crate) fn module_main() {
        // Let the engine finish its own startup before touching it.
        thread::sleep(Duration::from_secs(3));

        let dir = game_dir();
        init_logging(&dir);
        info!("translator module starting in {}", dir.display());

        let ctx = ModuleContext::new(load_config(&dir)).install();

        if connect_transport(ctx) {
            info!("connected to orchestrator");
        } else {
            info!("running from local cache only");
        }

        match ctx.pipeline().load_cache() {
            Ok(count) if count > 0 => info!("cache primed with {} entries", count),
            Ok(_) => {}
            Err(e) => info!("no usable cache file: {}", e),
        }

        let kind = detect_engine();
        info!("engine detected: {}", kind);
        let installed = match kind {
            EngineKind::Mono => install_mono_hooks(ctx),
            EngineKind::Unreal => install_unreal_hooks(ctx, &dir),
        };
        if let Err(e) = installed {
            // Degraded but valid: no hooks, exports still work.
            error!("hook installation failed: {:#}", e);
        }

        RUNNING.store(true, Ordering::SeqCst);
        let mut tick = 0u32;
        while RUNNING.load(Ordering::SeqCst) {
            if !ctx.is_connected() {
                ctx.detach_transport();
                if connect_transport(ctx) {
                    info!("reconnected to orchestrator");
                }
            } else if let Some(transport) = ctx.transport() {
                for line in relay::drain() {
                    if transport.send_log(line.level, &line.message).is_err() {
                        break;
                    }
                }
                if tick % STATS_INTERVAL_TICKS == 0 {
                    let stats = ctx.pipeline().stats();
                    let _ = transport.send_stats(
                        stats.total_requests,
                        stats.cache_hits,
                        stats.errors,
                    );
                }
            }

            tick = tick.wrapping_add(1);
            thread::sleep(Duration::from_millis(100));
        }

        info!("translator module stopping");
        ctx.teardown();
    }
}

#[cfg(target_os = "windows")]
mod entry {
    use std::ffi::c_void;
    use std::sync::atomic::Ordering;
    use std::thread;

    use windows::Win32::Foundation::{BOOL, HMODULE, TRUE};
    use windows::Win32::System::LibraryLoader::DisableThreadLibraryCalls;

    use super::module::{module_main, RUNNING};

    const DLL_PROCESS_ATTACH: u32 = 1;
    const DLL_PROCESS_DETACH: u32 = 0;

    /// DLL entry point: spin up the worker thread on attach, stop it on
    /// detach. Nothing heavier runs under loader lock.
    #[no_mangle]
    pub extern "system" fn DllMain(module: HMODULE, reason: u32, _reserved: *mut c_void) -> BOOL {
        match reason {
            DLL_PROCESS_ATTACH => {
                // SAFETY: module is the handle the loader passed us.
                unsafe {
                    let _ = DisableThreadLibraryCalls(module);
                }
                thread::spawn(module_main);
            }
            DLL_PROCESS_DETACH => {
                RUNNING.store(false, Ordering::SeqCst);
            }
            _ => {}
        }
        TRUE
    }
}
