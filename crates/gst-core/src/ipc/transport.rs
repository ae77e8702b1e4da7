//! Client transport: request correlation and asynchronous reply delivery.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::ipc::frame::{Frame, MessageType};

/// Deadline for translation requests issued from a detour: an engine thread
/// is blocked while we wait.
pub const HOOK_REQUEST_TIMEOUT: Duration = Duration::from_millis(2000);

/// Deadline for orchestrator-initiated requests.
pub const ORCHESTRATOR_REQUEST_TIMEOUT: Duration = Duration::from_millis(5000);

enum Slot {
    Pending,
    Ready(String),
}

type MessageHandler = Box<dyn FnMut(&Frame) + Send>;

struct Shared {
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    waiters: Mutex<HashMap<u32, Slot>>,
    available: Condvar,
    connected: AtomicBool,
    next_request_id: AtomicU32,
    handler: Mutex<Option<MessageHandler>>,
}

/// Duplex message transport over any pair of stream halves.
///
/// A dedicated thread blocks on the read half and routes TRANSLATE_RESPONSE
/// frames to waiters keyed by request id; everything else goes to the
/// registered message handler. Waiters park on a condvar with a deadline, so
/// many requests can be outstanding and responses may arrive in any order.
pub struct Transport {
    shared: Arc<Shared>,
}

impl Transport {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let shared = Arc::new(Shared {
            writer: Mutex::new(Some(Box::new(writer) as Box<dyn Write + Send>)),
            waiters: Mutex::new(HashMap::new()),
            available: Condvar::new(),
            connected: AtomicBool::new(true),
            next_request_id: AtomicU32::new(1),
            handler: Mutex::new(None),
        });

        let loop_shared = Arc::clone(&shared);
        let spawned = thread::Builder::new()
            .name("gst-ipc-recv".to_string())
            .spawn(move || receive_loop(reader, loop_shared));
        if let Err(e) = spawned {
            warn!("failed to start receive thread: {}", e);
            shared.connected.store(false, Ordering::SeqCst);
        }

        Self { shared }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Register the handler for frames that are not translate responses
    /// (CONFIG_UPDATE and friends). Replaces any previous handler.
    pub fn set_message_handler<F>(&self, handler: F)
    where
        F: FnMut(&Frame) + Send + 'static,
    {
        *lock(&self.shared.handler) = Some(Box::new(handler));
    }

    /// Send a frame without expecting a reply.
    pub fn send(&self, frame: &Frame) -> Result<()> {
        self.shared.send(frame)
    }

    pub fn send_log(&self, level: &str, message: &str) -> Result<()> {
        let line = format!("[{}] {}", level, message);
        self.send(&Frame::text(MessageType::LogMessage, 0, &line))
    }

    pub fn send_stats(&self, requests: u64, cache_hits: u64, errors: u64) -> Result<()> {
        self.send(&Frame::stats(requests, cache_hits, errors))
    }

    /// Send a TRANSLATE_REQUEST and block until the matching response arrives
    /// or the deadline passes. On timeout the pending slot is abandoned; a
    /// response that arrives later is dropped silently by the receive loop.
    pub fn request_translation(&self, text: &str, timeout: Duration) -> Result<String> {
        if !self.is_connected() {
            return Err(Error::IpcNotConnected);
        }

        let request_id = self.shared.next_request_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.shared.waiters).insert(request_id, Slot::Pending);

        let frame = Frame::text(MessageType::TranslateRequest, request_id, text);
        if let Err(e) = self.shared.send(&frame) {
            lock(&self.shared.waiters).remove(&request_id);
            return Err(e);
        }

        let deadline = Instant::now() + timeout;
        let mut waiters = lock(&self.shared.waiters);
        loop {
            if matches!(waiters.get(&request_id), Some(Slot::Ready(_))) {
                if let Some(Slot::Ready(translated)) = waiters.remove(&request_id) {
                    return Ok(translated);
                }
            }
            if !self.is_connected() {
                waiters.remove(&request_id);
                return Err(Error::IpcNotConnected);
            }
            let now = Instant::now();
            if now >= deadline {
                waiters.remove(&request_id);
                return Err(Error::IpcTimeout(request_id));
            }
            let (guard, _) = self
                .shared
                .available
                .wait_timeout(waiters, deadline - now)
                .unwrap_or_else(|e| {
                    let (guard, timeout) = e.into_inner();
                    (guard, timeout)
                });
            waiters = guard;
        }
    }

    /// Close the channel. Pending waiters wake and fail with
    /// `IpcNotConnected`. Safe to call any number of times.
    pub fn disconnect(&self) {
        self.shared.connected.store(false, Ordering::SeqCst);
        *lock(&self.shared.writer) = None;
        self.shared.available.notify_all();
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl Shared {
    fn send(&self, frame: &Frame) -> Result<()> {
        let mut writer = lock(&self.writer);
        let stream = writer.as_mut().ok_or(Error::IpcNotConnected)?;
        match frame.write_to(stream) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.connected.store(false, Ordering::SeqCst);
                *writer = None;
                Err(Error::Io(e))
            }
        }
    }
}

fn receive_loop<R: Read>(mut reader: R, shared: Arc<Shared>) {
    loop {
        let frame = match Frame::read_from(&mut reader) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("receive loop ending: {}", e);
                break;
            }
        };

        match frame.message_type {
            MessageType::TranslateResponse => {
                let translated = match frame.payload_text() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("undecodable response {}: {}", frame.request_id, e);
                        continue;
                    }
                };
                let mut waiters = lock(&shared.waiters);
                match waiters.get_mut(&frame.request_id) {
                    Some(slot) => {
                        *slot = Slot::Ready(translated);
                        drop(waiters);
                        shared.available.notify_all();
                    }
                    None => {
                        debug!("response {} arrived after its deadline, dropped", frame.request_id);
                    }
                }
            }
            MessageType::Shutdown => {
                info!("shutdown received, stopping receive loop");
                break;
            }
            _ => {
                let mut handler = lock(&shared.handler);
                match handler.as_mut() {
                    Some(callback) => callback(&frame),
                    None => debug!("unhandled {} frame", frame.message_type),
                }
            }
        }
    }

    shared.connected.store(false, Ordering::SeqCst);
    shared.available.notify_all();
}

/// Poison-tolerant lock: a panicked engine thread must not wedge every other
/// thread that shares the transport.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::testing::duplex;
    use std::sync::mpsc;

    /// Minimal scripted server: answers each request id with `reply(text)`,
    /// optionally batching to reorder.
    fn echo_server<F>(
        mut reader: impl Read + Send + 'static,
        mut writer: impl Write + Send + 'static,
        reply: F,
        batch: usize,
    ) where
        F: Fn(&str) -> String + Send + 'static,
    {
        thread::spawn(move || {
            let mut held: Vec<Frame> = Vec::new();
            while let Ok(frame) = Frame::read_from(&mut reader) {
                if frame.message_type != MessageType::TranslateRequest {
                    continue;
                }
                held.push(frame);
                if held.len() < batch {
                    continue;
                }
                // Respond in reverse arrival order.
                for request in held.drain(..).rev() {
                    let text = request.payload_text().unwrap();
                    let response =
                        Frame::text(MessageType::TranslateResponse, request.request_id, &reply(&text));
                    response.write_to(&mut writer).unwrap();
                }
            }
        });
    }

    #[test]
    fn test_request_response() {
        let ((client_read, client_write), (server_read, server_write)) = duplex();
        echo_server(server_read, server_write, |t| format!("IT:{}", t), 1);

        let transport = Transport::new(client_read, client_write);
        let translated = transport
            .request_translation("Start Game", Duration::from_secs(2))
            .unwrap();
        assert_eq!(translated, "IT:Start Game");
    }

    #[test]
    fn test_out_of_order_responses_reach_their_waiters() {
        let ((client_read, client_write), (server_read, server_write)) = duplex();
        // Batch two requests, answer newest-first.
        echo_server(server_read, server_write, |t| format!("IT:{}", t), 2);

        let transport = Arc::new(Transport::new(client_read, client_write));
        let (tx, rx) = mpsc::channel();

        for text in ["alpha", "beta"] {
            let transport = Arc::clone(&transport);
            let tx = tx.clone();
            thread::spawn(move || {
                let result = transport.request_translation(text, Duration::from_secs(2));
                tx.send((text, result)).unwrap();
            });
        }

        for _ in 0..2 {
            let (text, result) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(result.unwrap(), format!("IT:{}", text));
        }
    }

    #[test]
    fn test_request_ids_are_monotonic_from_one() {
        let ((client_read, client_write), (mut server_read, server_write)) = duplex();
        let transport = Transport::new(client_read, client_write);
        // No server responses: requests will time out, ids still advance.
        let _ = transport.request_translation("a", Duration::from_millis(10));
        let _ = transport.request_translation("b", Duration::from_millis(10));

        let first = Frame::read_from(&mut server_read).unwrap();
        let second = Frame::read_from(&mut server_read).unwrap();
        assert_eq!(first.request_id, 1);
        assert_eq!(second.request_id, 2);
        drop(server_write);
    }

    #[test]
    fn test_timeout_abandons_slot_and_late_response_is_dropped() {
        let ((client_read, client_write), (mut server_read, mut server_write)) = duplex();
        let transport = Transport::new(client_read, client_write);

        let err = transport
            .request_translation("slow", Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, Error::IpcTimeout(1)));

        // The late response for id 1 must not disturb the next request.
        let request = Frame::read_from(&mut server_read).unwrap();
        Frame::text(MessageType::TranslateResponse, request.request_id, "late")
            .write_to(&mut server_write)
            .unwrap();

        thread::spawn(move || {
            let request = Frame::read_from(&mut server_read).unwrap();
            Frame::text(MessageType::TranslateResponse, request.request_id, "fresh")
                .write_to(&mut server_write)
                .unwrap();
        });

        let translated = transport
            .request_translation("next", Duration::from_secs(2))
            .unwrap();
        assert_eq!(translated, "fresh");
    }

    #[test]
    fn test_shutdown_frame_stops_receive_loop() {
        let ((client_read, client_write), (_server_read, mut server_write)) = duplex();
        let transport = Transport::new(client_read, client_write);
        assert!(transport.is_connected());

        Frame::new(MessageType::Shutdown, 0, Vec::new())
            .write_to(&mut server_write)
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while transport.is_connected() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!transport.is_connected());
    }

    #[test]
    fn test_disconnect_is_idempotent_and_fails_requests() {
        let ((client_read, client_write), _server) = duplex();
        let transport = Transport::new(client_read, client_write);

        transport.disconnect();
        transport.disconnect();
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.request_translation("x", Duration::from_millis(10)),
            Err(Error::IpcNotConnected)
        ));
    }

    #[test]
    fn test_non_response_frames_reach_handler() {
        let ((client_read, client_write), (_server_read, mut server_write)) = duplex();
        let transport = Transport::new(client_read, client_write);

        let (tx, rx) = mpsc::channel();
        transport.set_message_handler(move |frame| {
            tx.send((frame.message_type, frame.payload_text().unwrap())).unwrap();
        });

        Frame::text(MessageType::ConfigUpdate, 0, "{\"enabled\":false}")
            .write_to(&mut server_write)
            .unwrap();

        let (message_type, payload) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(message_type, MessageType::ConfigUpdate);
        assert_eq!(payload, "{\"enabled\":false}");
    }
}
