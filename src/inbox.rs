//! Inbox aggregation over engagement records and their message logs.
//!
//! Messages are stored per engagement and per pair of parties, while the
//! inbox shows one conversation per counterpart. [`Inbox`] merges the logs a
//! viewer shares with each counterpart and reconciles read state across them.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use log::{debug, info};
use uuid::Uuid;

use crate::api::models::{
    Conversation, ConversationKey, EngagementRecord, LogKey, Message, PartySummary,
};
use crate::error::{InboxError, Result};
use crate::storage::MessageStore;

/// The party the viewer talks to through `record`, if any.
///
/// When the viewer owns the record the first response's author is used as
/// the counterpart, so an owner only ever chats with one responder per
/// record. Responders always talk to the owner.
pub fn counterpart_of<'a>(record: &'a EngagementRecord, viewer: &str) -> Option<&'a PartySummary> {
    let counterpart = if record.owner_id() == viewer {
        record.responses.first().map(|r| &r.responder)
    } else if record.responses.iter().any(|r| r.responder.id == viewer) {
        Some(&record.owner)
    } else {
        None
    };
    counterpart.filter(|c| c.id != viewer)
}

struct Pending {
    counterpart: PartySummary,
    snapshot_at: DateTime<Utc>,
    latest_activity: DateTime<Utc>,
    messages: Vec<Message>,
    engagement_ids: Vec<String>,
}

impl Pending {
    fn new(counterpart: &PartySummary, record: &EngagementRecord) -> Self {
        Self {
            counterpart: counterpart.clone(),
            snapshot_at: record.latest_activity(),
            latest_activity: record.latest_activity(),
            messages: Vec::new(),
            engagement_ids: Vec::new(),
        }
    }

    fn absorb(&mut self, record: &EngagementRecord, counterpart: &PartySummary, log: Vec<Message>) {
        let activity = record.latest_activity();
        if activity >= self.snapshot_at {
            self.counterpart = counterpart.clone();
            self.snapshot_at = activity;
        }
        self.latest_activity = self.latest_activity.max(activity);
        if !self.engagement_ids.contains(&record.id) {
            self.engagement_ids.push(record.id.clone());
        }
        self.messages.extend(log);
    }

    /// Returns the conversation and the instant it sorts by.
    fn finish(mut self, key: ConversationKey, viewer: &str) -> (DateTime<Utc>, Conversation) {
        // stable: equal timestamps keep log order
        self.messages.sort_by_key(|m| m.created_at);
        let mut seen = HashSet::new();
        self.messages.retain(|m| seen.insert(m.id.clone()));

        let last_message = self.messages.last().cloned();
        let unread_count = self
            .messages
            .iter()
            .filter(|m| !m.read && m.sender_id != viewer)
            .count();
        let sort_at = last_message
            .as_ref()
            .map(|m| m.created_at)
            .unwrap_or(self.latest_activity);

        (
            sort_at,
            Conversation {
                key,
                counterpart: self.counterpart,
                messages: self.messages,
                last_message,
                unread_count,
                engagement_ids: self.engagement_ids,
            },
        )
    }
}

/// Conversation aggregator. Holds the message store and no other state, so
/// every call reflects exactly what the store contains at that moment.
pub struct Inbox<S> {
    store: S,
}

impl<S: MessageStore> Inbox<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Conversations visible to `viewer`, most recent first.
    pub fn build_conversations(
        &self,
        viewer: &str,
        engagements: &[EngagementRecord],
    ) -> Result<Vec<Conversation>> {
        let mut pending: BTreeMap<ConversationKey, Pending> = BTreeMap::new();
        for record in engagements {
            if !record.is_participant(viewer) {
                continue;
            }
            let Some(counterpart) = counterpart_of(record, viewer) else {
                debug!("engagement {} has no counterpart for {viewer}", record.id);
                continue;
            };
            let key = ConversationKey::new(viewer, counterpart.id.as_str());
            let log = self.store.get_log(&LogKey::new(record.id.as_str(), key.clone()))?;
            pending
                .entry(key)
                .or_insert_with(|| Pending::new(counterpart, record))
                .absorb(record, counterpart, log);
        }

        let mut out: Vec<_> = pending
            .into_iter()
            .map(|(key, p)| {
                let text = key.to_string();
                let (at, conversation) = p.finish(key, viewer);
                (at, text, conversation)
            })
            .collect();
        // ties fall back to the rendered key text, not the member-wise order
        out.sort_by(|(a_at, a_text, _), (b_at, b_text, _)| {
            b_at.cmp(a_at).then_with(|| a_text.cmp(b_text))
        });
        debug!("built {} conversations for {viewer}", out.len());
        Ok(out.into_iter().map(|(_, _, c)| c).collect())
    }

    /// A single merged thread, or `None` when `viewer` shares no engagement
    /// with the other member of `key`.
    pub fn conversation(
        &self,
        viewer: &str,
        key: &ConversationKey,
        engagements: &[EngagementRecord],
    ) -> Result<Option<Conversation>> {
        ensure_member(key, viewer)?;
        let found = self
            .build_conversations(viewer, engagements)?
            .into_iter()
            .find(|c| &c.key == key);
        Ok(found)
    }

    /// Total unread messages across the viewer's inbox.
    pub fn unread_total(&self, viewer: &str, engagements: &[EngagementRecord]) -> Result<usize> {
        Ok(self
            .build_conversations(viewer, engagements)?
            .iter()
            .map(|c| c.unread_count)
            .sum())
    }

    /// Marks every message the viewer received in the conversation as read,
    /// across all engagements that feed it. Returns how many changed.
    pub fn mark_conversation_read(
        &mut self,
        viewer: &str,
        key: &ConversationKey,
        engagements: &[EngagementRecord],
    ) -> Result<usize> {
        let other = ensure_member(key, viewer)?;
        let mut logs: Vec<LogKey> = Vec::new();
        for record in engagements {
            if counterpart_of(record, viewer).is_some_and(|c| c.id == other)
                && !logs.iter().any(|l| l.engagement_id == record.id)
            {
                logs.push(LogKey::new(record.id.as_str(), key.clone()));
            }
        }
        if logs.is_empty() {
            return Ok(0);
        }
        let changed = self.store.set_read_flags_all(&logs, viewer)?;
        info!("{viewer} read {changed} messages in {key}");
        Ok(changed)
    }

    /// Validates and stores a new message from `sender` to `recipient` in
    /// the log of `engagement_id`.
    pub fn append_message(
        &mut self,
        engagements: &[EngagementRecord],
        engagement_id: &str,
        sender: &str,
        recipient: &str,
        text: &str,
    ) -> Result<Message> {
        let text = text.trim();
        if text.is_empty() {
            return Err(InboxError::EmptyMessage);
        }
        let record = engagements
            .iter()
            .find(|r| r.id == engagement_id)
            .ok_or_else(|| InboxError::EngagementNotFound(engagement_id.to_string()))?;
        if !record.is_participant(sender) {
            return Err(not_participant(sender, &format!("engagement {engagement_id}")));
        }
        // both sides must see each other as counterpart, or the log is never read
        let paired = counterpart_of(record, sender).is_some_and(|c| c.id == recipient)
            && counterpart_of(record, recipient).is_some_and(|c| c.id == sender);
        if !paired {
            return Err(not_participant(
                recipient,
                &format!("a conversation with {sender} on engagement {engagement_id}"),
            ));
        }

        let message = Message {
            id: Uuid::new_v4().to_string(),
            sender_id: sender.to_string(),
            text: text.to_string(),
            created_at: Utc::now(),
            read: false,
        };
        let key = LogKey::new(engagement_id, ConversationKey::new(sender, recipient));
        self.store.append_log(&key, &message)?;
        info!("{sender} -> {recipient} on {engagement_id}: message {}", message.id);
        Ok(message)
    }
}

fn not_participant(party: &str, scope: &str) -> InboxError {
    InboxError::NotParticipant {
        party: party.to_string(),
        scope: scope.to_string(),
    }
}

fn ensure_member<'k>(key: &'k ConversationKey, viewer: &str) -> Result<&'k str> {
    key.other(viewer)
        .ok_or_else(|| not_participant(viewer, &format!("conversation {key}")))
}
