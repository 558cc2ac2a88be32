use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// A captured warn+ log record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    pub seq: u64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub fields: Option<String>,
    pub task_id: Option<String>,
    pub connection_id: Option<String>,
}

/// Query parameters for searching captured logs.
#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    pub level: Option<String>,
    pub target: Option<String>,
    pub task_id: Option<String>,
    pub limit: Option<usize>,
}

struct BufferInner {
    records: VecDeque<LogRecord>,
    next_seq: u64,
}

/// Bounded in-memory ring of warn+ records. Oldest entries fall off once the
/// capacity is reached.
pub struct LogBuffer {
    inner: Mutex<BufferInner>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(BufferInner {
                records: VecDeque::with_capacity(capacity.min(1024)),
                next_seq: 0,
            }),
            capacity: capacity.max(1),
        }
    }

    fn insert(&self, record: LogInsert) {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        if inner.records.len() == self.capacity {
            inner.records.pop_front();
        }
        inner.records.push_back(LogRecord {
            seq,
            timestamp: record.timestamp,
            level: record.level,
            target: record.target,
            message: record.message,
            fields: record.fields,
            task_id: record.task_id,
            connection_id: record.connection_id,
        });
    }

    /// Most recent matching records first.
    pub fn query(&self, q: &LogQuery) -> Vec<LogRecord> {
        let inner = self.inner.lock();
        let limit = q.limit.unwrap_or(100);
        inner
            .records
            .iter()
            .rev()
            .filter(|r| q.level.as_deref().is_none_or(|level| r.level == level))
            .filter(|r| q.target.as_deref().is_none_or(|t| r.target.contains(t)))
            .filter(|r| {
                q.task_id
                    .as_deref()
                    .is_none_or(|id| r.task_id.as_deref() == Some(id))
            })
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.inner.lock().records.len()
    }
}

/// Internal insert record (not public).
struct LogInsert {
    timestamp: String,
    level: String,
    target: String,
    message: String,
    fields: Option<String>,
    task_id: Option<String>,
    connection_id: Option<String>,
}

/// tracing Layer that captures warn+ events into a `LogBuffer`.
pub struct BufferLogLayer {
    buffer: Arc<LogBuffer>,
}

impl BufferLogLayer {
    pub fn new(buffer: Arc<LogBuffer>) -> Self {
        Self { buffer }
    }
}

/// Visitor that extracts fields from a tracing event.
struct FieldVisitor {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
    task_id: Option<String>,
    connection_id: Option<String>,
}

impl FieldVisitor {
    fn new() -> Self {
        Self {
            message: None,
            fields: serde_json::Map::new(),
            task_id: None,
            connection_id: None,
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let val = format!("{:?}", value);
        match field.name() {
            "message" => self.message = Some(val),
            "task_id" => self.task_id = Some(val.trim_matches('"').to_string()),
            "connection_id" => self.connection_id = Some(val.trim_matches('"').to_string()),
            name => {
                self.fields
                    .insert(name.to_string(), serde_json::Value::String(val));
            }
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            "task_id" => self.task_id = Some(value.to_string()),
            "connection_id" => self.connection_id = Some(value.to_string()),
            name => {
                self.fields
                    .insert(name.to_string(), serde_json::Value::String(value.to_string()));
            }
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(
            field.name().to_string(),
            serde_json::Value::Number(value.into()),
        );
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.fields
                .insert(field.name().to_string(), serde_json::Value::Number(n));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Bool(value));
    }
}

impl<S> Layer<S> for BufferLogLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        // Only capture WARN and above
        let level = *event.metadata().level();
        if level > tracing::Level::WARN {
            return;
        }

        let mut visitor = FieldVisitor::new();
        event.record(&mut visitor);

        // Try to extract task_id/connection_id from span context if not on the event
        if visitor.task_id.is_none() || visitor.connection_id.is_none() {
            if let Some(scope) = ctx.event_scope(event) {
                for span in scope {
                    let extensions = span.extensions();
                    if let Some(fields) = extensions.get::<SpanFields>() {
                        if visitor.task_id.is_none() {
                            visitor.task_id.clone_from(&fields.task_id);
                        }
                        if visitor.connection_id.is_none() {
                            visitor.connection_id.clone_from(&fields.connection_id);
                        }
                    }
                }
            }
        }

        let fields_json = if visitor.fields.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&visitor.fields).unwrap_or_default())
        };

        self.buffer.insert(LogInsert {
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string().to_uppercase(),
            target: event.metadata().target().to_string(),
            message: visitor.message.unwrap_or_default(),
            fields: fields_json,
            task_id: visitor.task_id,
            connection_id: visitor.connection_id,
        });
    }

    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::new();
        attrs.record(&mut visitor);

        if visitor.task_id.is_some() || visitor.connection_id.is_some() {
            if let Some(span) = ctx.span(id) {
                let mut extensions = span.extensions_mut();
                extensions.insert(SpanFields {
                    task_id: visitor.task_id,
                    connection_id: visitor.connection_id,
                });
            }
        }
    }
}

/// Stored on spans to propagate task_id / connection_id to child events.
struct SpanFields {
    task_id: Option<String>,
    connection_id: Option<String>,
}
