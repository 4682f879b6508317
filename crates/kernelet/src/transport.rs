//! Server/transport seam.
//!
//! The transport owns sockets and the per-channel delivery loops and calls
//! back into [`Kernel::dispatch_shell`](crate::kernel::Kernel::dispatch_shell)
//! and friends with raw frames. The engine only needs the primitives below;
//! sends are assumed queued/non-blocking and failures are the transport's to
//! log.

use std::time::Duration;

use async_trait::async_trait;

use crate::protocol::WireMessage;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Broadcast on the status channel. The first frame is the topic.
    async fn publish(&self, frames: WireMessage);

    async fn send_shell(&self, frames: WireMessage);

    async fn send_control(&self, frames: WireMessage);

    async fn send_stdin(&self, frames: WireMessage);

    /// Stop the delivery loops. Already-queued sends may still flush, which
    /// is what lets a shutdown reply reach the front-end.
    async fn stop(&self);

    /// Hand back Shell messages already queued but not yet dispatched,
    /// polling for at most `poll_interval`. Ends deterministically; used by
    /// the abort controller to answer queued requests without handling them.
    async fn drain_shell_queue(&self, poll_interval: Duration) -> Vec<WireMessage>;
}
