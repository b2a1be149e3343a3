//! Ordered claim conversation timeline.
//!
//! Three sources feed one append-only list: the history fetched at session
//! start, server pushes, and optimistic local sends. Order is arrival order;
//! timestamps are carried for display only.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chargeback_proto::{ClaimId, ClientEvent, HistoryRecord, InboundMessage};
use chrono::Utc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::bootstrap::{BootstrapClient, BootstrapError};
use crate::handlers::Subscription;
use crate::transport::{Channel, ChannelError, EventSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    CreditCard,
    Adjudicator,
    Seller,
}

impl Role {
    /// Maps a history `sender` onto a role. Unknown senders fall back to
    /// [`Role::User`].
    pub fn from_sender(sender: &str) -> Self {
        match sender.trim().to_ascii_lowercase().as_str() {
            "user" => Role::User,
            "assistant" | "adjudicator" | "system" => Role::Adjudicator,
            "seller" | "merchant" => Role::Seller,
            "credit-card" | "credit_card" | "bank" => Role::CreditCard,
            _ => Role::User,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Role::User => "You",
            Role::CreditCard => "Credit Card Co.",
            Role::Adjudicator => "Adjudicator",
            Role::Seller => "Seller",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::CreditCard => "credit_card",
            Role::Adjudicator => "adjudicator",
            Role::Seller => "seller",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Pending,
    Confirmed,
    Failed,
}

/// Locally assigned; never sent to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(u64);

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    pub author: String,
    pub role: Role,
    pub timestamp: String,
    pub delivery: DeliveryState,
    /// Quick replies offered alongside a pushed message.
    pub options: Vec<String>,
}

/// What counts as "already in the timeline" when a push arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Every push is appended.
    #[default]
    AppendAll,
    /// Skip a push whose content and timestamp both equal an existing entry.
    ContentAndTimestamp,
}

#[derive(Debug, Error)]
#[error("message not sent: {source}")]
pub struct SendError {
    /// The retracted entry, marked [`DeliveryState::Failed`].
    pub message: Message,
    #[source]
    pub source: ChannelError,
}

pub struct MessageSync {
    policy: DuplicatePolicy,
    timeline: watch::Sender<Vec<Message>>,
    next_id: AtomicU64,
}

impl Default for MessageSync {
    fn default() -> Self {
        Self::new(DuplicatePolicy::default())
    }
}

impl MessageSync {
    pub fn new(policy: DuplicatePolicy) -> Self {
        let (timeline, _) = watch::channel(Vec::new());
        Self {
            policy,
            timeline,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Current ordered timeline.
    pub fn timeline(&self) -> Vec<Message> {
        self.timeline.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.timeline.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receiver that observes every timeline mutation.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Message>> {
        self.timeline.subscribe()
    }

    fn allocate_id(&self) -> MessageId {
        MessageId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Replaces the whole timeline with the fetched history, all confirmed.
    pub fn replace_history(&self, records: Vec<HistoryRecord>) {
        let messages: Vec<Message> = records
            .into_iter()
            .map(|record| {
                let role = Role::from_sender(&record.sender);
                Message {
                    id: self.allocate_id(),
                    content: record.content,
                    author: role.display_name().to_string(),
                    role,
                    timestamp: record.timestamp.unwrap_or_default(),
                    delivery: DeliveryState::Confirmed,
                    options: Vec::new(),
                }
            })
            .collect();
        debug!(target = "chargeback.sync", entries = messages.len(), "history loaded");
        self.timeline.send_replace(messages);
    }

    pub async fn load_history(
        &self,
        bootstrap: &BootstrapClient,
        claim_id: ClaimId,
    ) -> Result<usize, BootstrapError> {
        let records = bootstrap.get_messages(claim_id).await?;
        let count = records.len();
        self.replace_history(records);
        Ok(count)
    }

    /// Appends a pushed message, stamped now. Returns `None` when the
    /// duplicate policy drops it.
    pub fn record_push(&self, message: &InboundMessage) -> Option<MessageId> {
        self.record_push_at(message, Utc::now().to_rfc3339())
    }

    pub fn record_push_at(
        &self,
        message: &InboundMessage,
        timestamp: impl Into<String>,
    ) -> Option<MessageId> {
        let timestamp = timestamp.into();
        let id = self.allocate_id();
        let policy = self.policy;
        let appended = self.timeline.send_if_modified(|timeline| {
            if policy == DuplicatePolicy::ContentAndTimestamp
                && timeline
                    .iter()
                    .any(|m| m.content == message.text && m.timestamp == timestamp)
            {
                return false;
            }
            timeline.push(Message {
                id,
                content: message.text.clone(),
                author: Role::Adjudicator.display_name().to_string(),
                role: Role::Adjudicator,
                timestamp: timestamp.clone(),
                delivery: DeliveryState::Confirmed,
                options: message.options.clone(),
            });
            true
        });
        if appended {
            Some(id)
        } else {
            debug!(target = "chargeback.sync", "duplicate push skipped");
            None
        }
    }

    /// Optimistically appends the user's message, then emits it. On emit
    /// failure exactly that entry is removed again and handed back in the
    /// error.
    pub fn send(
        &self,
        sink: &dyn EventSink,
        claim_id: ClaimId,
        text: impl Into<String>,
    ) -> Result<MessageId, SendError> {
        let text = text.into();
        let id = self.allocate_id();
        let pending = Message {
            id,
            content: text.clone(),
            author: Role::User.display_name().to_string(),
            role: Role::User,
            timestamp: Utc::now().to_rfc3339(),
            delivery: DeliveryState::Pending,
            options: Vec::new(),
        };
        let fallback = pending.clone();
        self.timeline.send_modify(|timeline| timeline.push(pending));

        match sink.emit(ClientEvent::UserResponse { text, claim_id }) {
            Ok(()) => {
                self.set_delivery(id, DeliveryState::Confirmed);
                Ok(id)
            }
            Err(source) => {
                warn!(target = "chargeback.sync", error = %source, "send failed; retracting message");
                let mut message = self.retract(id).unwrap_or(fallback);
                message.delivery = DeliveryState::Failed;
                Err(SendError { message, source })
            }
        }
    }

    fn set_delivery(&self, id: MessageId, delivery: DeliveryState) {
        self.timeline.send_if_modified(|timeline| {
            match timeline.iter_mut().find(|m| m.id == id) {
                Some(message) if message.delivery != delivery => {
                    message.delivery = delivery;
                    true
                }
                _ => false,
            }
        });
    }

    /// Removes the entry with `id`, returning it.
    pub fn retract(&self, id: MessageId) -> Option<Message> {
        let mut removed = None;
        self.timeline.send_if_modified(|timeline| {
            match timeline.iter().position(|m| m.id == id) {
                Some(index) => {
                    removed = Some(timeline.remove(index));
                    true
                }
                None => false,
            }
        });
        removed
    }

    /// Routes the channel's message pushes into this timeline.
    pub fn attach(self: &Arc<Self>, channel: &Channel) -> Subscription<InboundMessage> {
        let sync: Weak<Self> = Arc::downgrade(self);
        channel.on_message(move |message: &InboundMessage| {
            if let Some(sync) = sync.upgrade() {
                sync.record_push(message);
            }
        })
    }
}
