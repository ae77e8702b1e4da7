//! Core of the live game-text translation system.
//!
//! Cross-process string discovery and size-preserving rewrites, the bounded
//! translation cache and pipeline shared with the injected module, and the
//! framed IPC channel that connects the two.

pub mod cache;
pub mod config;
pub mod error;
pub mod ipc;
pub mod memory;
pub mod orchestrator;
pub mod patch;
pub mod pipeline;
pub mod process;
pub mod scan;
pub mod signature;

pub use cache::TranslationCache;
pub use config::TranslatorConfig;
pub use error::{Error, Result};
pub use ipc::{Frame, MessageType, Transport};
pub use memory::{ProcessMemory, RegionInfo};
pub use orchestrator::{InjectionReport, TranslationPair};
pub use pipeline::{Translator, TranslatorStats};
pub use process::{ModuleInfo, ProcessHandle};
pub use scan::TextEncoding;
pub use signature::HookSignatureSet;
