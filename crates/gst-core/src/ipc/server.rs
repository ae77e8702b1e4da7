//! Orchestrator-side connection serving.
//!
//! The orchestrator owns the channel endpoint; each injected module connects
//! as a client. The serving loop answers TRANSLATE_REQUEST frames from a
//! translation provider and absorbs the module's telemetry uploads. The loop
//! is generic over the stream halves so the same code runs over a named pipe
//! instance and over the in-memory duplex used in tests.

use std::collections::HashMap;
use std::io::{Read, Write};

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::ipc::frame::{Frame, MessageType};
use crate::ipc::legacy;

/// Source of translations consulted for each request. The translation engine
/// itself lives outside this crate; a loaded pair table is the usual
/// implementation.
pub trait TranslationProvider: Send + Sync {
    /// Translate `text`, or `None` when no translation is known.
    fn translate(&self, text: &str) -> Option<String>;
}

impl TranslationProvider for HashMap<String, String> {
    fn translate(&self, text: &str) -> Option<String> {
        self.get(text).cloned()
    }
}

/// Counters a serving loop accumulates from one client session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub requests_served: u64,
    pub log_messages: u64,
    /// Last STATS_UPDATE payload received, if any.
    pub remote: Option<(u64, u64, u64)>,
}

/// Serve one binary-framed client connection until it closes or sends no
/// further frames.
///
/// Unknown-to-this-side frame types are logged and skipped; an unanswerable
/// request is answered with the original text so the client never blocks on a
/// missing reply.
pub fn serve_connection<R, W, P>(
    mut reader: R,
    mut writer: W,
    provider: &P,
) -> Result<SessionStats>
where
    R: Read,
    W: Write,
    P: TranslationProvider + ?Sized,
{
    let mut stats = SessionStats::default();

    loop {
        let frame = match Frame::read_from(&mut reader) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("client session ended: {}", e);
                break;
            }
        };

        match frame.message_type {
            MessageType::TranslateRequest => {
                let text = match frame.payload_text() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("undecodable request {}: {}", frame.request_id, e);
                        continue;
                    }
                };
                let reply = provider.translate(&text).unwrap_or_else(|| text.clone());
                stats.requests_served += 1;
                Frame::text(MessageType::TranslateResponse, frame.request_id, &reply)
                    .write_to(&mut writer)?;
            }
            MessageType::LogMessage => {
                stats.log_messages += 1;
                if let Ok(line) = frame.payload_text() {
                    info!(target: "gst_core::remote", "{}", line);
                }
            }
            MessageType::StatsUpdate => match frame.payload_stats() {
                Ok(counters) => stats.remote = Some(counters),
                Err(e) => warn!("bad stats payload: {}", e),
            },
            MessageType::CacheSync => {
                debug!("cache sync ({} bytes)", frame.payload.len());
            }
            MessageType::Shutdown => {
                info!("client requested shutdown");
                break;
            }
            other => {
                debug!("ignoring {} frame from client", other);
            }
        }
    }

    Ok(stats)
}

/// Serve one legacy JSON client connection. One message per read, matching
/// the message-boundary channel the legacy clients use. Binary frames are not
/// accepted here; each channel speaks exactly one framing.
pub fn serve_legacy_connection<R, W, P>(
    mut reader: R,
    mut writer: W,
    provider: &P,
) -> Result<SessionStats>
where
    R: Read,
    W: Write,
    P: TranslationProvider + ?Sized,
{
    let mut stats = SessionStats::default();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let count = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(count) => count,
            Err(e) => {
                debug!("legacy session ended: {}", e);
                break;
            }
        };

        let message = String::from_utf8_lossy(&buffer[..count]);
        let Some(text) = legacy::extract_text(&message) else {
            warn!("rejecting message that is not a legacy translate request");
            continue;
        };

        let reply = provider.translate(&text).unwrap_or_else(|| text.clone());
        stats.requests_served += 1;
        writer.write_all(legacy::encode_response(&reply).as_bytes())?;
        writer.flush()?;
    }

    Ok(stats)
}

/// Ask a connected client to stop: used when the orchestrator session ends.
pub fn send_shutdown<W: Write>(writer: &mut W) -> Result<()> {
    Frame::new(MessageType::Shutdown, 0, Vec::new()).write_to(writer)?;
    Ok(())
}

/// Push a configuration document to a connected client.
pub fn send_config_update<W: Write>(writer: &mut W, config_json: &str) -> Result<()> {
    Frame::text(MessageType::ConfigUpdate, 0, config_json).write_to(writer)?;
    Ok(())
}
