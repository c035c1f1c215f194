//! Notification/streaming layer
//!
//! Server-to-client events delivered out of band: progress updates, log
//! messages, and list-changed signals. Everything funnels into the session's
//! single outbound queue, so notification order is FIFO per session and
//! notifications interleave freely with responses. Emitting on a closed
//! session is a logged no-op; the layer never re-opens a destroyed session.

use {
    serde_json::{json, Value},
    tokio::sync::mpsc,
    tracing::debug,
};

use crate::protocol::message::{Message, RequestId};

/// Log levels for log message notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

/// Out-of-band events the server can push to a client
#[derive(Debug, Clone)]
pub enum ServerNotification {
    /// Progress update tied to an in-flight request. The correlation
    /// identifier is carried in the payload as the progress token.
    Progress {
        token: RequestId,
        progress: f64,
        total: Option<f64>,
    },
    /// Log message
    LogMessage {
        level: LogLevel,
        logger: Option<String>,
        message: String,
        data: Option<Value>,
    },
    /// Tools have changed
    ToolsListChanged,
    /// Resources have changed
    ResourcesListChanged,
    /// Prompts have changed
    PromptsListChanged,
    /// Custom notification
    Custom { method: String, params: Value },
}

impl ServerNotification {
    pub fn method(&self) -> &str {
        match self {
            Self::Progress { .. } => "notifications/progress",
            Self::LogMessage { .. } => "notifications/message",
            Self::ToolsListChanged => "notifications/tools/list_changed",
            Self::ResourcesListChanged => "notifications/resources/list_changed",
            Self::PromptsListChanged => "notifications/prompts/list_changed",
            Self::Custom { method, .. } => method,
        }
    }

    /// Convert into a wire message (a Notification never carries the
    /// message-level correlation field)
    pub fn into_message(self) -> Message {
        let method = self.method().to_string();
        let params = match self {
            Self::Progress {
                token,
                progress,
                total,
            } => {
                let mut p = json!({
                    "progressToken": token.to_value(),
                    "progress": progress,
                });
                if let Some(total) = total {
                    p["total"] = json!(total);
                }
                p
            }
            Self::LogMessage {
                level,
                logger,
                message,
                data,
            } => {
                let mut p = json!({
                    "level": level.as_str(),
                    "message": message,
                });
                if let Some(logger) = logger {
                    p["logger"] = json!(logger);
                }
                if let Some(data) = data {
                    p["data"] = data;
                }
                p
            }
            Self::ToolsListChanged | Self::ResourcesListChanged | Self::PromptsListChanged => {
                Value::Null
            }
            Self::Custom { params, .. } => params,
        };
        Message::Notification { method, params }
    }
}

/// Cloneable handle on a session's outbound write path.
///
/// The queue is drained by a single writer task, which is what keeps two
/// concurrently completing handlers from interleaving partial frames.
#[derive(Clone)]
pub struct OutboundSender {
    session_id: String,
    tx: mpsc::UnboundedSender<Message>,
}

impl OutboundSender {
    pub(crate) fn new(session_id: String, tx: mpsc::UnboundedSender<Message>) -> Self {
        Self { session_id, tx }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Enqueue a message. On a closed session this is a logged no-op.
    pub fn send(&self, message: Message) {
        if self.tx.send(message).is_err() {
            debug!(
                session_id = %self.session_id,
                "session closed, dropping outbound message"
            );
        }
    }
}

/// Ergonomic notification interface handed to handlers
#[derive(Clone)]
pub struct NotificationCtx {
    outbound: OutboundSender,
}

impl NotificationCtx {
    pub(crate) fn new(outbound: OutboundSender) -> Self {
        Self { outbound }
    }

    /// Emit an out-of-band notification on this session
    pub fn emit(&self, notification: ServerNotification) {
        self.outbound.send(notification.into_message());
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message, None);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message, None);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message, None);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message, None);
    }

    /// Send a log notification with custom level and optional structured data
    pub fn log(&self, level: LogLevel, message: impl Into<String>, data: Option<Value>) {
        self.emit(ServerNotification::LogMessage {
            level,
            logger: Some("app".to_string()),
            message: message.into(),
            data,
        });
    }

    /// Send a progress notification for a long-running request
    pub fn progress(&self, token: RequestId, progress: f64, total: Option<f64>) {
        self.emit(ServerNotification::Progress {
            token,
            progress,
            total,
        });
    }

    pub fn tools_changed(&self) {
        self.emit(ServerNotification::ToolsListChanged);
    }

    pub fn resources_changed(&self) {
        self.emit(ServerNotification::ResourcesListChanged);
    }

    pub fn prompts_changed(&self) {
        self.emit(ServerNotification::PromptsListChanged);
    }
}
