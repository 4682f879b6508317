//! Per-request IO primitives.
//!
//! A [`KernelIo`] is built by the dispatcher for each inbound message and
//! carries that message's [`ParentContext`]. Every reply, broadcast, and
//! stdin request issued through it is stamped with the context it was built
//! from, so nothing handled concurrently on another channel can mis-stamp
//! it. Handlers use it for replies; the interpreter receives it during
//! `execute` for mid-run output and input requests.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::auth::Authenticator;
use crate::codec;
use crate::protocol::{Channel, Header, Message, ParentContext};
use crate::transport::Transport;

/// Stable identity stamped into every outgoing header.
#[derive(Debug, Clone)]
pub(crate) struct KernelIdentity {
    pub kernel_id: String,
    pub username: String,
    pub session_id: String,
    pub protocol_version: String,
}

pub struct KernelIo {
    transport: Arc<dyn Transport>,
    auth: Arc<dyn Authenticator>,
    identity: KernelIdentity,
    parent: ParentContext,
}

impl KernelIo {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        auth: Arc<dyn Authenticator>,
        identity: KernelIdentity,
        parent: ParentContext,
    ) -> Self {
        Self {
            transport,
            auth,
            identity,
            parent,
        }
    }

    /// Header of the request this handle was built for.
    pub fn parent_header(&self) -> &Header {
        &self.parent.header
    }

    fn make_header(&self, msg_type: &str) -> Header {
        Header::new(
            msg_type,
            &self.identity.username,
            &self.identity.session_id,
            &self.identity.protocol_version,
        )
    }

    /// Broadcast on the topic `kernel.{kernel_id}.{msg_type}`. No routing
    /// identities; the topic travels as the first frame.
    pub async fn publish(&self, msg_type: &str, metadata: Value, content: Value) {
        let topic = format!("kernel.{}.{}", self.identity.kernel_id, msg_type);
        let message = Message {
            identities: vec![topic.into_bytes()],
            header: self.make_header(msg_type),
            parent_header: Some(self.parent.header.clone()),
            metadata,
            content,
        };
        self.transport
            .publish(codec::encode(&message, self.auth.as_ref()))
            .await;
    }

    /// Routed message back to the requester on the given channel.
    pub async fn reply(&self, msg_type: &str, metadata: Value, content: Value, channel: Channel) {
        let message = Message {
            identities: self.parent.identities.clone(),
            header: self.make_header(msg_type),
            parent_header: Some(self.parent.header.clone()),
            metadata,
            content,
        };
        let frames = codec::encode(&message, self.auth.as_ref());
        match channel {
            Channel::Shell => self.transport.send_shell(frames).await,
            Channel::Control => self.transport.send_control(frames).await,
            Channel::Stdin => self.transport.send_stdin(frames).await,
        }
    }

    /// Request input from the front-end mid-execution.
    pub async fn stdin_request(&self, msg_type: &str, metadata: Value, content: Value) {
        self.reply(msg_type, metadata, content, Channel::Stdin).await;
    }

    /// Broadcast the code about to run, echoing the front-end's request.
    pub async fn publish_execute_input(&self, code: &str, execution_count: i64) {
        self.publish(
            "execute_input",
            json!({}),
            json!({"code": code, "execution_count": execution_count}),
        )
        .await;
    }

    pub(crate) async fn publish_status(&self, execution_state: &str) {
        self.publish("status", json!({}), json!({"execution_state": execution_state}))
            .await;
    }
}
