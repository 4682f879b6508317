//! Dispatch engine: the single funnel for Shell and Control traffic.
//!
//! Flow per inbound message:
//! 1. Decode + verify (drop on failure, nothing else happens)
//! 2. Build the parent context and bracket with busy/idle status broadcasts
//! 3. Resolve the handler and invoke it; failures are contained here
//!
//! One bad message never stops the loop: decode failures, unknown message
//! types, and handler errors are all logged and swallowed at this boundary.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::auth::Authenticator;
use crate::codec;
use crate::comm::CommRegistry;
use crate::interpreter::{ExecuteRequest, HistoryArguments, Interpreter, InterpreterError};
use crate::output::{KernelIdentity, KernelIo};
use crate::protocol::{Channel, Message, ParentContext, PROTOCOL_VERSION, WireMessage};
use crate::transport::Transport;

/// Engine configuration. Bootstrap (connection files, subscribers) happens
/// outside; this is only what dispatch itself needs.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Stable kernel identity, used in broadcast topics.
    pub kernel_id: String,
    /// Originating user stamped into outgoing headers.
    pub username: String,
    pub session_id: String,
    /// Reported verbatim in kernel_info replies.
    pub protocol_version: String,
    /// Bound on the abort-drain polling window.
    pub abort_poll: Duration,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            kernel_id: uuid::Uuid::new_v4().to_string(),
            username: "kernel".to_string(),
            session_id: uuid::Uuid::new_v4().to_string(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            abort_poll: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Execute,
    Complete,
    Inspect,
    History,
    IsComplete,
    CommInfo,
    CommOpen,
    CommClose,
    CommMsg,
    KernelInfo,
    Shutdown,
    Interrupt,
}

/// Immutable msg_type -> handler mapping, built once at construction.
struct HandlerTable {
    entries: HashMap<&'static str, RequestKind>,
}

impl HandlerTable {
    fn new() -> Self {
        let entries = HashMap::from([
            ("execute_request", RequestKind::Execute),
            ("complete_request", RequestKind::Complete),
            ("inspect_request", RequestKind::Inspect),
            ("history_request", RequestKind::History),
            ("is_complete_request", RequestKind::IsComplete),
            ("comm_info_request", RequestKind::CommInfo),
            ("comm_open", RequestKind::CommOpen),
            ("comm_close", RequestKind::CommClose),
            ("comm_msg", RequestKind::CommMsg),
            ("kernel_info_request", RequestKind::KernelInfo),
            ("shutdown_request", RequestKind::Shutdown),
            ("interrupt_request", RequestKind::Interrupt),
        ]);
        Self { entries }
    }

    fn resolve(&self, msg_type: &str) -> Option<RequestKind> {
        self.entries.get(msg_type).copied()
    }
}

/// Handler failures contained at the dispatch boundary.
#[derive(Debug, thiserror::Error)]
enum HandlerError {
    #[error("invalid {msg_type} content: {source}")]
    BadContent {
        msg_type: &'static str,
        source: serde_json::Error,
    },

    #[error("interpreter error: {0}")]
    Interpreter(#[from] InterpreterError),
}

fn parse_content<T: DeserializeOwned>(
    msg_type: &'static str,
    content: &Value,
) -> Result<T, HandlerError> {
    // Some front-ends send null for request types without arguments.
    let content = if content.is_null() {
        json!({})
    } else {
        content.clone()
    };
    serde_json::from_value(content).map_err(|source| HandlerError::BadContent { msg_type, source })
}

fn default_cursor() -> i64 {
    -1
}

#[derive(Deserialize)]
struct CompleteContent {
    #[serde(default)]
    code: String,
    #[serde(default = "default_cursor")]
    cursor_pos: i64,
}

#[derive(Deserialize)]
struct InspectContent {
    #[serde(default)]
    code: String,
    #[serde(default = "default_cursor")]
    cursor_pos: i64,
    #[serde(default)]
    detail_level: i64,
}

#[derive(Deserialize)]
struct IsCompleteContent {
    #[serde(default)]
    code: String,
}

#[derive(Deserialize)]
struct CommInfoContent {
    #[serde(default)]
    target_name: String,
}

#[derive(Deserialize)]
struct ShutdownContent {
    #[serde(default)]
    restart: bool,
}

#[derive(Deserialize)]
struct CommOpenContent {
    comm_id: String,
    target_name: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct CommIdContent {
    comm_id: String,
    #[serde(default)]
    data: Value,
}

pub struct Kernel {
    config: KernelConfig,
    auth: Arc<dyn Authenticator>,
    transport: Arc<dyn Transport>,
    interpreter: Arc<dyn Interpreter>,
    comms: CommRegistry,
    handlers: HandlerTable,
}

impl Kernel {
    pub fn new(
        config: KernelConfig,
        auth: Arc<dyn Authenticator>,
        transport: Arc<dyn Transport>,
        interpreter: Arc<dyn Interpreter>,
    ) -> Self {
        Self {
            config,
            auth,
            transport,
            interpreter,
            comms: CommRegistry::new(),
            handlers: HandlerTable::new(),
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Comm registry, for registering targets before serving traffic.
    pub fn comms(&self) -> &CommRegistry {
        &self.comms
    }

    fn io(&self, parent: ParentContext) -> KernelIo {
        KernelIo::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.auth),
            KernelIdentity {
                kernel_id: self.config.kernel_id.clone(),
                username: self.config.username.clone(),
                session_id: self.config.session_id.clone(),
                protocol_version: self.config.protocol_version.clone(),
            },
            parent,
        )
    }

    /// Shell listener entry point.
    pub async fn dispatch_shell(&self, frames: WireMessage) {
        self.dispatch(frames, Channel::Shell).await;
    }

    /// Control listener entry point.
    pub async fn dispatch_control(&self, frames: WireMessage) {
        self.dispatch(frames, Channel::Control).await;
    }

    /// Stdin listener entry point: forwards `input_reply` values to the
    /// interpreter's input hook. No busy/idle bracket on this channel.
    pub async fn dispatch_stdin(&self, frames: WireMessage) {
        let message = match codec::decode(&frames, self.auth.as_ref()) {
            Ok(message) => message,
            Err(error) => {
                tracing::error!(%error, "dropping undecodable stdin message");
                return;
            }
        };

        if message.header.msg_type != "input_reply" {
            tracing::warn!(
                msg_type = %message.header.msg_type,
                "unexpected message on stdin channel"
            );
            return;
        }

        match message.content.get("value").and_then(Value::as_str) {
            Some(value) => self.interpreter.input_reply(value.to_string()).await,
            None => tracing::warn!(content = %message.content, "input_reply without value"),
        }
    }

    async fn dispatch(&self, frames: WireMessage, channel: Channel) {
        let message = match codec::decode(&frames, self.auth.as_ref()) {
            Ok(message) => message,
            Err(error) => {
                // No busy/idle here: there is no valid parent context to
                // stamp the broadcasts against.
                tracing::error!(%error, ?channel, "dropping undecodable message");
                return;
            }
        };

        let io = self.io(ParentContext::of(&message));
        io.publish_status("busy").await;

        match self.handlers.resolve(&message.header.msg_type) {
            None => {
                tracing::warn!(msg_type = %message.header.msg_type, "unknown message type");
            }
            Some(kind) => {
                if let Err(error) = self.invoke(kind, &message, &io, channel).await {
                    tracing::error!(
                        %error,
                        msg_type = %message.header.msg_type,
                        content = %message.content,
                        "handler failed"
                    );
                }
            }
        }

        io.publish_status("idle").await;
    }

    async fn invoke(
        &self,
        kind: RequestKind,
        message: &Message,
        io: &KernelIo,
        channel: Channel,
    ) -> Result<(), HandlerError> {
        match kind {
            RequestKind::Execute => self.handle_execute(message, io, channel).await,
            RequestKind::Complete => self.handle_complete(message, io, channel).await,
            RequestKind::Inspect => self.handle_inspect(message, io, channel).await,
            RequestKind::History => self.handle_history(message, io, channel).await,
            RequestKind::IsComplete => self.handle_is_complete(message, io, channel).await,
            RequestKind::CommInfo => self.handle_comm_info(message, io, channel).await,
            RequestKind::CommOpen => self.handle_comm_open(message),
            RequestKind::CommClose => self.handle_comm_close(message),
            RequestKind::CommMsg => self.handle_comm_msg(message),
            RequestKind::KernelInfo => self.handle_kernel_info(io, channel).await,
            RequestKind::Shutdown => self.handle_shutdown(message, io, channel).await,
            RequestKind::Interrupt => self.handle_interrupt(io, channel).await,
        }
    }

    async fn handle_execute(
        &self,
        message: &Message,
        io: &KernelIo,
        channel: Channel,
    ) -> Result<(), HandlerError> {
        let mut request: ExecuteRequest = parse_content("execute_request", &message.content)?;
        request.store_history = request.store_history && !request.silent;
        let silent = request.silent;
        let stop_on_error = request.stop_on_error;

        let metadata = json!({
            "started": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        });

        let reply = self.interpreter.execute(request, io).await?;
        let status = reply
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("error")
            .to_string();
        io.reply("execute_reply", metadata, reply, channel).await;

        if status == "error" && stop_on_error && !silent {
            self.abort_queue().await;
        }
        Ok(())
    }

    async fn handle_complete(
        &self,
        message: &Message,
        io: &KernelIo,
        channel: Channel,
    ) -> Result<(), HandlerError> {
        let content: CompleteContent = parse_content("complete_request", &message.content)?;
        let reply = self
            .interpreter
            .complete(&content.code, content.cursor_pos)
            .await?;
        io.reply("complete_reply", json!({}), reply, channel).await;
        Ok(())
    }

    async fn handle_inspect(
        &self,
        message: &Message,
        io: &KernelIo,
        channel: Channel,
    ) -> Result<(), HandlerError> {
        let content: InspectContent = parse_content("inspect_request", &message.content)?;
        let reply = self
            .interpreter
            .inspect(&content.code, content.cursor_pos, content.detail_level)
            .await?;
        io.reply("inspect_reply", json!({}), reply, channel).await;
        Ok(())
    }

    async fn handle_history(
        &self,
        message: &Message,
        io: &KernelIo,
        channel: Channel,
    ) -> Result<(), HandlerError> {
        let args: HistoryArguments = parse_content("history_request", &message.content)?;
        let reply = self.interpreter.history(args).await?;
        io.reply("history_reply", json!({}), reply, channel).await;
        Ok(())
    }

    async fn handle_is_complete(
        &self,
        message: &Message,
        io: &KernelIo,
        channel: Channel,
    ) -> Result<(), HandlerError> {
        let content: IsCompleteContent = parse_content("is_complete_request", &message.content)?;
        let reply = self.interpreter.is_complete(&content.code).await?;
        io.reply("is_complete_reply", json!({}), reply, channel).await;
        Ok(())
    }

    async fn handle_comm_info(
        &self,
        message: &Message,
        io: &KernelIo,
        channel: Channel,
    ) -> Result<(), HandlerError> {
        let content: CommInfoContent = parse_content("comm_info_request", &message.content)?;
        let mut comms = serde_json::Map::new();
        for (comm_id, target_name) in self.comms.list(&content.target_name) {
            comms.insert(comm_id, json!({"target_name": target_name}));
        }
        let reply = json!({"comms": comms, "status": "ok"});
        io.reply("comm_info_reply", json!({}), reply, channel).await;
        Ok(())
    }

    async fn handle_kernel_info(
        &self,
        io: &KernelIo,
        channel: Channel,
    ) -> Result<(), HandlerError> {
        let info = match self.interpreter.kernel_info().await? {
            Value::Object(mut map) => {
                map.insert(
                    "protocol_version".to_string(),
                    Value::String(self.config.protocol_version.clone()),
                );
                Value::Object(map)
            }
            other => {
                tracing::warn!(result = %other, "kernel_info result was not an object, replacing");
                json!({"protocol_version": self.config.protocol_version})
            }
        };
        io.reply("kernel_info_reply", json!({}), info, channel).await;
        Ok(())
    }

    /// Stop the transport, broadcast the shutdown event, then reply. The
    /// reply is still sent so the front-end sees it before teardown.
    async fn handle_shutdown(
        &self,
        message: &Message,
        io: &KernelIo,
        channel: Channel,
    ) -> Result<(), HandlerError> {
        let content: ShutdownContent = parse_content("shutdown_request", &message.content)?;
        self.transport.stop().await;
        let reply = json!({"restart": content.restart});
        io.publish("shutdown", json!({}), reply.clone()).await;
        io.reply("shutdown_reply", json!({}), reply, channel).await;
        Ok(())
    }

    /// Bypasses the execute pipeline; answered immediately.
    async fn handle_interrupt(
        &self,
        io: &KernelIo,
        channel: Channel,
    ) -> Result<(), HandlerError> {
        self.interpreter.interrupt().await;
        io.reply("interrupt_reply", json!({}), json!({}), channel).await;
        Ok(())
    }

    fn handle_comm_open(&self, message: &Message) -> Result<(), HandlerError> {
        let content: CommOpenContent = parse_content("comm_open", &message.content)?;
        self.comms
            .open(&content.comm_id, &content.target_name, &content.data);
        Ok(())
    }

    fn handle_comm_close(&self, message: &Message) -> Result<(), HandlerError> {
        let content: CommIdContent = parse_content("comm_close", &message.content)?;
        self.comms.close(&content.comm_id, &content.data);
        Ok(())
    }

    fn handle_comm_msg(&self, message: &Message) -> Result<(), HandlerError> {
        let content: CommIdContent = parse_content("comm_msg", &message.content)?;
        self.comms.message(&content.comm_id, &content.data);
        Ok(())
    }

    /// Abort-on-error: answer every already-queued Shell request with a
    /// synthesized error reply instead of handling it. Bounded by the
    /// configured polling window; messages arriving after it resume normal
    /// dispatch.
    async fn abort_queue(&self) {
        let drained = self.transport.drain_shell_queue(self.config.abort_poll).await;
        tracing::debug!(count = drained.len(), "aborting queued shell messages");
        for frames in drained {
            self.abort_request(&frames).await;
        }
    }

    async fn abort_request(&self, frames: &WireMessage) {
        let message = match codec::decode(frames, self.auth.as_ref()) {
            Ok(message) => message,
            Err(error) => {
                tracing::error!(%error, "could not decode queued message during abort");
                return;
            }
        };

        let msg_type = &message.header.msg_type;
        let Some(base) = msg_type.strip_suffix("_request") else {
            tracing::warn!(%msg_type, "queued message is not a request, skipping abort reply");
            return;
        };
        let reply_type = format!("{base}_reply");

        // The drained message's own header becomes the parent so the
        // front-end can correlate the synthesized failure.
        let io = self.io(ParentContext::of(&message));
        io.reply(&reply_type, json!({}), json!({"status": "error"}), Channel::Shell)
            .await;
    }
}
