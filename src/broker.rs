//! In-process broker transport (§4.8).
//!
//! The distilled spec treats the broker client as an opaque external
//! collaborator and never names its shape. This module supplies one
//! concrete, in-process transport so the crate is runnable end to end:
//! channel-addressed publish/subscribe for the one-way patterns, an
//! in-memory FIFO queue per channel supporting requeue-with-attempt-count,
//! and a request/response correlation table for the two RPC patterns. It
//! owns no business logic — connectors are the only callers.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

use tokio::sync::{Mutex as AsyncMutex, broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::envelope::{Request, Response};
use crate::error::BridgeError;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// A queue entry. Requeue increments `x-requeue-attempt` in `request`'s
/// metadata rather than tracking attempts out of band, so the attempt count
/// travels with the message the same way it would over a real wire.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    /// The enqueued request.
    pub request: Request,
}

impl QueueMessage {
    /// Wrap a request for enqueueing, with no prior requeue attempts.
    #[must_use]
    pub fn new(request: Request) -> Self {
        Self { request }
    }

    /// The current requeue attempt count (`0` for a message never requeued).
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.request
            .metadata
            .get("x-requeue-attempt")
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0)
    }

    fn with_incremented_attempt(mut self) -> Self {
        let next = self.attempt() + 1;
        self.request.metadata.insert("x-requeue-attempt".to_string(), next.to_string());
        self
    }
}

/// A single in-flight RPC call awaiting a response.
pub struct PendingCall {
    /// The request the caller sent.
    pub request: Request,
    reply_tx: oneshot::Sender<Response>,
}

impl PendingCall {
    /// Take the request out, leaving a default in its place. Lets a
    /// responder move the request into a dispatch future while keeping
    /// `self` around (and intact enough to move) to reply with later.
    pub fn take_request(&mut self) -> Request {
        std::mem::take(&mut self.request)
    }

    /// Fulfil this call with a response, waking the caller of
    /// [`Broker::rpc_send`].
    pub fn respond(self, response: Response) {
        let _ = self.reply_tx.send(response);
    }
}

struct QueueChannel {
    sender: mpsc::UnboundedSender<QueueMessage>,
    receiver: AsyncMutex<mpsc::UnboundedReceiver<QueueMessage>>,
}

/// Channel-addressed in-process broker shared by every source and target
/// connector in a process.
#[derive(Clone)]
pub struct Broker {
    events: std::sync::Arc<StdMutex<HashMap<String, broadcast::Sender<Request>>>>,
    queues: std::sync::Arc<StdMutex<HashMap<String, std::sync::Arc<QueueChannel>>>>,
    rpc: std::sync::Arc<StdMutex<HashMap<String, mpsc::UnboundedSender<PendingCall>>>>,
    rpc_receivers: std::sync::Arc<StdMutex<HashMap<String, Option<mpsc::UnboundedReceiver<PendingCall>>>>>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker {
    /// Build an empty broker with no registered channels.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: std::sync::Arc::new(StdMutex::new(HashMap::new())),
            queues: std::sync::Arc::new(StdMutex::new(HashMap::new())),
            rpc: std::sync::Arc::new(StdMutex::new(HashMap::new())),
            rpc_receivers: std::sync::Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    fn event_sender(&self, channel: &str) -> broadcast::Sender<Request> {
        let mut guard = self.events.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(EVENT_CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Publish an event to every current subscriber of `channel`.
    /// Fire-and-forget: with no subscribers, the event is simply dropped.
    pub fn publish_event(&self, channel: &str, request: Request) {
        let _ = self.event_sender(channel).send(request);
    }

    /// Subscribe to events published on `channel` from this point forward.
    #[must_use]
    pub fn subscribe_events(&self, channel: &str) -> broadcast::Receiver<Request> {
        self.event_sender(channel).subscribe()
    }

    fn queue_channel(&self, channel: &str) -> std::sync::Arc<QueueChannel> {
        let mut guard = self.queues.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard
            .entry(channel.to_string())
            .or_insert_with(|| {
                let (sender, receiver) = mpsc::unbounded_channel();
                std::sync::Arc::new(QueueChannel { sender, receiver: AsyncMutex::new(receiver) })
            })
            .clone()
    }

    /// Push a message onto the back of `channel`'s queue.
    pub fn queue_push(&self, channel: &str, message: QueueMessage) {
        // An unbounded channel only fails to send once every receiver (and
        // thus the channel itself) has been dropped, which never happens
        // here: `Broker` keeps the receiver alive for the channel's lifetime.
        let _ = self.queue_channel(channel).sender.send(message);
    }

    /// Pop the next message from `channel`'s queue, waiting until one
    /// arrives or `cancel` fires.
    ///
    /// # Errors
    /// Returns [`BridgeError::Cancelled`] if `cancel` fires before a message
    /// arrives.
    pub async fn queue_pop(&self, channel: &str, cancel: &CancellationToken) -> Result<QueueMessage, BridgeError> {
        let queue = self.queue_channel(channel);
        let mut receiver = queue.receiver.lock().await;
        tokio::select! {
            msg = receiver.recv() => msg.ok_or(BridgeError::Transport("queue closed".to_string())),
            () = cancel.cancelled() => Err(BridgeError::Cancelled),
        }
    }

    /// Return a failed message to the back of `channel`'s queue with its
    /// requeue attempt counter incremented.
    pub fn queue_requeue(&self, channel: &str, message: QueueMessage) {
        self.queue_push(channel, message.with_incremented_attempt());
    }

    fn rpc_sender(&self, channel: &str) -> Option<mpsc::UnboundedSender<PendingCall>> {
        let guard = self.rpc.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.get(channel).cloned()
    }

    /// Take ownership of the inbound-call stream for `channel`. Only one
    /// caller may hold the receiver for a given channel at a time; calling
    /// this twice for the same channel returns `None` the second time.
    pub fn rpc_receiver(&self, channel: &str) -> Option<mpsc::UnboundedReceiver<PendingCall>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.rpc.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(channel.to_string(), sender);
        let mut receivers = self.rpc_receivers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        receivers.insert(channel.to_string(), Some(receiver));
        receivers.get_mut(channel).and_then(Option::take)
    }

    /// Send an RPC request on `channel` and wait for its response.
    ///
    /// # Errors
    /// Returns [`BridgeError::Transport`] when nobody has called
    /// [`Broker::rpc_receiver`] for `channel`, or the responder was dropped
    /// without replying; returns [`BridgeError::Cancelled`] if `cancel`
    /// fires first.
    pub async fn rpc_send(&self, channel: &str, request: Request, cancel: &CancellationToken) -> Result<Response, BridgeError> {
        let sender = self
            .rpc_sender(channel)
            .ok_or_else(|| BridgeError::Transport(format!("no responder registered on channel {channel}")))?;
        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .send(PendingCall { request, reply_tx })
            .map_err(|_| BridgeError::Transport(format!("responder on channel {channel} is gone")))?;
        tokio::select! {
            res = reply_rx => res.map_err(|_| BridgeError::Transport("responder dropped without replying".to_string())),
            () = cancel.cancelled() => Err(BridgeError::Cancelled),
        }
    }
}
