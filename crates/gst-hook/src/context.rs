//! Module root context.
//!
//! One process-wide anchor owns the configuration, cache, transport,
//! pipeline and hook engine for the lifetime of the injected module. Detours
//! are plain functions, so they reach the context through a single global;
//! everything the context owns is torn down in reverse construction order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use tracing::{info, warn};

use gst_core::cache::TranslationCache;
use gst_core::config::TranslatorConfig;
use gst_core::ipc::Transport;
use gst_core::pipeline::Translator;

use crate::engine::{EngineState, HookBackend, HookEngine};
use crate::filter;
use crate::mono::MonoApi;

static CONTEXT: OnceLock<ModuleContext> = OnceLock::new();

/// Trampoline addresses the detours read on every interception. Written once
/// during install, before the hooks are enabled.
#[derive(Default)]
struct Trampolines {
    unreal_to_string: AtomicU64,
    unreal_set_text: AtomicU64,
    mono_string_new: AtomicU64,
    mono_string_new_utf16: AtomicU64,
    mono_runtime_invoke: AtomicU64,
}

pub struct ModuleContext {
    cache: Arc<Mutex<TranslationCache>>,
    pipeline: Arc<Translator>,
    transport: Mutex<Option<Arc<Transport>>>,
    engine: Mutex<Option<Box<dyn EngineHandle>>>,
    mono_api: OnceLock<MonoApi>,
    trampolines: Trampolines,
    set_text_observed: AtomicU64,
}

/// Object-safe view of the hook engine the context needs for teardown.
trait EngineHandle: Send {
    fn disable_all(&mut self);
    fn teardown(&mut self);
    fn state(&self) -> EngineState;
}

impl<B: HookBackend + Send> EngineHandle for HookEngine<B> {
    fn disable_all(&mut self) {
        HookEngine::disable_all(self)
    }

    fn teardown(&mut self) {
        HookEngine::teardown(self)
    }

    fn state(&self) -> EngineState {
        HookEngine::state(self)
    }
}

impl ModuleContext {
    pub fn new(config: TranslatorConfig) -> Self {
        let cache = Arc::new(Mutex::new(TranslationCache::new(config.max_cache_size)));
        let pipeline = Arc::new(Translator::new(config, Arc::clone(&cache)));
        Self {
            cache,
            pipeline,
            transport: Mutex::new(None),
            engine: Mutex::new(None),
            mono_api: OnceLock::new(),
            trampolines: Trampolines::default(),
            set_text_observed: AtomicU64::new(0),
        }
    }

    /// Install as the process-wide context. Returns the existing one when
    /// the module initialized twice.
    pub fn install(self) -> &'static ModuleContext {
        CONTEXT.get_or_init(|| self)
    }

    pub fn pipeline(&self) -> &Arc<Translator> {
        &self.pipeline
    }

    pub fn cache(&self) -> &Arc<Mutex<TranslationCache>> {
        &self.cache
    }

    /// Attach a connected transport; the pipeline starts using it at once.
    pub fn attach_transport(&self, transport: Arc<Transport>) {
        self.pipeline.set_transport(Some(Arc::clone(&transport)));
        *lock(&self.transport) = Some(transport);
    }

    pub fn detach_transport(&self) {
        self.pipeline.set_transport(None);
        if let Some(transport) = lock(&self.transport).take() {
            transport.disconnect();
        }
    }

    pub fn transport(&self) -> Option<Arc<Transport>> {
        lock(&self.transport).clone()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.transport)
            .as_ref()
            .map(|t| t.is_connected())
            .unwrap_or(false)
    }

    /// Hand the hook engine to the context; it owns teardown from here.
    pub fn adopt_engine<B: HookBackend + Send + 'static>(&self, engine: HookEngine<B>) {
        *lock(&self.engine) = Some(Box::new(engine));
    }

    pub fn engine_state(&self) -> EngineState {
        lock(&self.engine)
            .as_ref()
            .map(|e| e.state())
            .unwrap_or(EngineState::Uninitialized)
    }

    pub fn mono_api(&self) -> Option<&MonoApi> {
        self.mono_api.get()
    }

    pub fn set_mono_api(&self, api: MonoApi) {
        let _ = self.mono_api.set(api);
    }

    /// Translate on behalf of a detour: filtered input, cache-or-IPC lookup,
    /// `None` when the result would not change the string.
    pub fn translate_hooked(&self, text: &str) -> Option<String> {
        if !filter::is_translatable(text) {
            return None;
        }
        let translated = self.pipeline.translate(text);
        if translated.is_empty() || translated == text {
            None
        } else {
            Some(translated)
        }
    }

    pub fn note_set_text_observed(&self) {
        self.set_text_observed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_text_observed(&self) -> u64 {
        self.set_text_observed.load(Ordering::Relaxed)
    }

    /// Reverse-order teardown: hooks first, then cache persistence, then the
    /// channel.
    pub fn teardown(&self) {
        info!("module teardown");
        if let Some(engine) = lock(&self.engine).as_mut() {
            engine.disable_all();
            engine.teardown();
        }
        if let Err(e) = self.pipeline.save_cache() {
            warn!("cache save during teardown failed: {}", e);
        }
        self.detach_transport();
    }

    // Trampoline slots, written during install and read by the detours.

    pub fn set_unreal_to_string_trampoline(&self, address: u64) {
        self.trampolines.unreal_to_string.store(address, Ordering::SeqCst);
    }

    pub fn unreal_to_string_trampoline(&self) -> u64 {
        self.trampolines.unreal_to_string.load(Ordering::SeqCst)
    }

    pub fn set_unreal_set_text_trampoline(&self, address: u64) {
        self.trampolines.unreal_set_text.store(address, Ordering::SeqCst);
    }

    pub fn unreal_set_text_trampoline(&self) -> u64 {
        self.trampolines.unreal_set_text.load(Ordering::SeqCst)
    }

    pub fn set_mono_string_new_trampoline(&self, address: u64) {
        self.trampolines.mono_string_new.store(address, Ordering::SeqCst);
    }

    pub fn mono_string_new_trampoline(&self) -> u64 {
        self.trampolines.mono_string_new.load(Ordering::SeqCst)
    }

    pub fn set_mono_string_new_utf16_trampoline(&self, address: u64) {
        self.trampolines.mono_string_new_utf16.store(address, Ordering::SeqCst);
    }

    pub fn mono_string_new_utf16_trampoline(&self) -> u64 {
        self.trampolines.mono_string_new_utf16.load(Ordering::SeqCst)
    }

    pub fn set_mono_runtime_invoke_trampoline(&self, address: u64) {
        self.trampolines.mono_runtime_invoke.store(address, Ordering::SeqCst);
    }

    pub fn mono_runtime_invoke_trampoline(&self) -> u64 {
        self.trampolines.mono_runtime_invoke.load(Ordering::SeqCst)
    }
}

/// The process-wide context, when the module has initialized.
pub fn get() -> Option<&'static ModuleContext> {
    CONTEXT.get()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gst_core::ipc::frame::{Frame, MessageType};
    use gst_core::ipc::testing::duplex;
    use std::sync::atomic::AtomicU64 as Counter;
    use std::thread;

    fn context_with_server(
        reply: impl Fn(&str) -> String + Send + 'static,
    ) -> (ModuleContext, Arc<Counter>) {
        let ((client_read, client_write), (server_read, server_write)) = duplex();
        let served = Arc::new(Counter::new(0));

        let count = Arc::clone(&served);
        thread::spawn(move || {
            let mut reader = server_read;
            let mut writer = server_write;
            while let Ok(frame) = Frame::read_from(&mut reader) {
                if frame.message_type != MessageType::TranslateRequest {
                    continue;
                }
                count.fetch_add(1, Ordering::SeqCst);
                let text = frame.payload_text().unwrap();
                Frame::text(MessageType::TranslateResponse, frame.request_id, &reply(&text))
                    .write_to(&mut writer)
                    .unwrap();
            }
        });

        let context = ModuleContext::new(TranslatorConfig::default());
        context.attach_transport(Arc::new(Transport::new(client_read, client_write)));
        (context, served)
    }

    #[test]
    fn test_hooked_translation_caches_and_skips_second_ipc() {
        let (context, served) = context_with_server(|text| match text {
            "Player" => "Giocatore".to_string(),
            other => other.to_string(),
        });

        assert_eq!(context.translate_hooked("Player").as_deref(), Some("Giocatore"));
        assert_eq!(served.load(Ordering::SeqCst), 1);

        // Second identical call is served from the cache.
        assert_eq!(context.translate_hooked("Player").as_deref(), Some("Giocatore"));
        assert_eq!(served.load(Ordering::SeqCst), 1);
        assert_eq!(context.pipeline().cache_len(), 1);
    }

    #[test]
    fn test_hooked_translation_filters_and_rejects_unchanged() {
        let (context, served) = context_with_server(|text| text.to_string());

        // Filtered before any pipeline work.
        assert_eq!(context.translate_hooked("a/b"), None);
        assert_eq!(context.translate_hooked(""), None);
        assert_eq!(served.load(Ordering::SeqCst), 0);

        // Unchanged server reply means "leave the string alone".
        assert_eq!(context.translate_hooked("Player"), None);
        assert_eq!(served.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_detach_transport_falls_back_to_cache_only() {
        let (context, _served) = context_with_server(|text| format!("IT:{}", text));
        assert_eq!(context.translate_hooked("Options").as_deref(), Some("IT:Options"));

        context.detach_transport();
        assert!(!context.is_connected());

        // Cached entry still serves; new strings fall through unchanged.
        assert_eq!(context.translate_hooked("Options").as_deref(), Some("IT:Options"));
        assert_eq!(context.translate_hooked("Brand New"), None);
    }

    #[test]
    fn test_trampoline_slots() {
        let context = ModuleContext::new(TranslatorConfig::default());
        assert_eq!(context.mono_string_new_trampoline(), 0);
        context.set_mono_string_new_trampoline(0x1234);
        assert_eq!(context.mono_string_new_trampoline(), 0x1234);
    }

    #[test]
    fn test_set_text_observation_counter() {
        let context = ModuleContext::new(TranslatorConfig::default());
        assert_eq!(context.set_text_observed(), 0);
        context.note_set_text_observed();
        context.note_set_text_observed();
        assert_eq!(context.set_text_observed(), 2);
    }
}
