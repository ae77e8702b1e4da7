//! Translation pipeline: cache consult, IPC request, fallback policy.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::cache::TranslationCache;
use crate::config::TranslatorConfig;
use crate::error::Result;
use crate::ipc::transport::{Transport, HOOK_REQUEST_TIMEOUT};

/// Snapshot of the pipeline's counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TranslatorStats {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub errors: u64,
    pub average_latency_ms: u64,
}

#[derive(Debug, Default)]
struct Counters {
    total_requests: u64,
    errors: u64,
    average_latency_ms: u64,
}

/// Rolling latency: each observation is averaged into the previous value.
fn roll_latency(old: u64, observed: u64) -> u64 {
    (old + observed) / 2
}

/// The translate state machine shared by every detour and export.
///
/// The cache and transport are owned by the module root context and handed in
/// as shared handles; the pipeline never holds the cache lock across an IPC
/// wait or file I/O. A failed or unanswered request falls back to the
/// original string, never to a missing one.
pub struct Translator {
    config: Mutex<TranslatorConfig>,
    cache: Arc<Mutex<TranslationCache>>,
    transport: Mutex<Option<Arc<Transport>>>,
    counters: Mutex<Counters>,
    request_timeout: Duration,
}

impl Translator {
    pub fn new(config: TranslatorConfig, cache: Arc<Mutex<TranslationCache>>) -> Self {
        Self {
            config: Mutex::new(config),
            cache,
            transport: Mutex::new(None),
            counters: Mutex::new(Counters::default()),
            request_timeout: HOOK_REQUEST_TIMEOUT,
        }
    }

    /// Override the per-request deadline (orchestrator-side pipelines wait
    /// longer than detours may).
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Attach or replace the transport; `None` detaches it.
    pub fn set_transport(&self, transport: Option<Arc<Transport>>) {
        *lock(&self.transport) = transport;
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.transport)
            .as_ref()
            .map(|t| t.is_connected())
            .unwrap_or(false)
    }

    pub fn is_enabled(&self) -> bool {
        lock(&self.config).enabled
    }

    pub fn set_enabled(&self, enabled: bool) {
        lock(&self.config).enabled = enabled;
    }

    pub fn toggle_enabled(&self) -> bool {
        let mut config = lock(&self.config);
        config.enabled = !config.enabled;
        config.enabled
    }

    pub fn set_target_language(&self, language: &str) {
        lock(&self.config).target_language = language.to_string();
    }

    pub fn config_snapshot(&self) -> TranslatorConfig {
        lock(&self.config).clone()
    }

    pub fn apply_config_update(&self, json: &str) -> Result<()> {
        lock(&self.config).apply_update(json)
    }

    /// Translate `original`, returning it unchanged when the pipeline is
    /// disabled or no translation can be produced in time.
    pub fn translate(&self, original: &str) -> String {
        if !self.is_enabled() {
            return original.to_string();
        }

        lock(&self.counters).total_requests += 1;

        let cache_enabled = lock(&self.config).cache_enabled;
        if cache_enabled {
            if let Some(translated) = lock(&self.cache).get(original) {
                return translated;
            }
        }

        let transport = lock(&self.transport).clone();
        let Some(transport) = transport.filter(|t| t.is_connected()) else {
            return original.to_string();
        };

        let started = Instant::now();
        match transport.request_translation(original, self.request_timeout) {
            Ok(translated) => {
                let observed = started.elapsed().as_millis() as u64;
                let mut counters = lock(&self.counters);
                counters.average_latency_ms = roll_latency(counters.average_latency_ms, observed);
                drop(counters);

                if cache_enabled {
                    lock(&self.cache).put(original, translated.clone());
                }
                translated
            }
            Err(e) => {
                debug!("translation of {:?} failed: {}", original, e);
                lock(&self.counters).errors += 1;
                original.to_string()
            }
        }
    }

    /// Asynchronous form; the callback is invoked exactly once, with the
    /// translation or the original.
    pub fn translate_async<F>(self: &Arc<Self>, original: String, callback: F)
    where
        F: FnOnce(String) + Send + 'static,
    {
        let pipeline = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("gst-translate".to_string())
            .spawn(move || {
                let translated = pipeline.translate(&original);
                callback(translated);
            });
        if let Err(e) = spawned {
            warn!("failed to spawn async translation: {}", e);
        }
    }

    pub fn stats(&self) -> TranslatorStats {
        let counters = lock(&self.counters);
        let cache = lock(&self.cache);
        TranslatorStats {
            total_requests: counters.total_requests,
            cache_hits: cache.hits(),
            cache_misses: cache.misses(),
            errors: counters.errors,
            average_latency_ms: counters.average_latency_ms,
        }
    }

    pub fn cache_len(&self) -> usize {
        lock(&self.cache).len()
    }

    pub fn clear_cache(&self) {
        lock(&self.cache).clear();
    }

    /// Persist the cache to the configured path; a disabled cache or empty
    /// path is a quiet no-op.
    pub fn save_cache(&self) -> Result<()> {
        let config = self.config_snapshot();
        if !config.cache_enabled {
            return Ok(());
        }
        let Some(path) = config.persistence_path() else {
            return Ok(());
        };
        lock(&self.cache).save_to(path)
    }

    /// Load the cache from the configured path. An absent or invalid file is
    /// reported but leaves the current contents alone.
    pub fn load_cache(&self) -> Result<usize> {
        let config = self.config_snapshot();
        if !config.cache_enabled {
            return Ok(0);
        }
        let Some(path) = config.persistence_path() else {
            return Ok(0);
        };
        lock(&self.cache).load_from(path)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
