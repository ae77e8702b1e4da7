//! Log forwarding to the orchestrator.
//!
//! A `tracing` layer captures the module's own log lines into a bounded
//! buffer; the main loop drains the buffer and ships each line as a
//! LOG_MESSAGE frame alongside the periodic stats upload. The transport
//! itself never logs from its send path, so forwarding cannot feed back.

use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Lines held while the channel is down; older lines are dropped first.
const MAX_BUFFERED: usize = 256;

static BUFFER: Mutex<VecDeque<LogLine>> = Mutex::new(VecDeque::new());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub level: &'static str,
    pub message: String,
}

/// Layer that mirrors info-and-above events into the relay buffer.
pub struct RelayLayer;

impl<S: Subscriber> Layer<S> for RelayLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level == Level::DEBUG || level == Level::TRACE {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let Some(message) = visitor.message else {
            return;
        };

        let mut buffer = lock_buffer();
        if buffer.len() >= MAX_BUFFERED {
            buffer.pop_front();
        }
        buffer.push_back(LogLine {
            level: level_name(level),
            message,
        });
    }
}

/// Take every buffered line, oldest first.
pub fn drain() -> Vec<LogLine> {
    lock_buffer().drain(..).collect()
}

fn lock_buffer() -> std::sync::MutexGuard<'static, VecDeque<LogLine>> {
    BUFFER.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn level_name(level: Level) -> &'static str {
    if level == Level::ERROR {
        "error"
    } else if level == Level::WARN {
        "warn"
    } else {
        "info"
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: Option<String>,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" && self.message.is_none() {
            self.message = Some(format!("{:?}", value));
        }
    }
}
