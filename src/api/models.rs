use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::InboxError;

/// Identity snapshot of a party as shown next to a conversation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PartySummary {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub online: bool,
}

impl PartySummary {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            avatar: None,
            online: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
}

/// A proposal submitted against an engagement.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    pub id: String,
    pub responder: PartySummary,
    #[serde(default)]
    pub proposal: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub status: ResponseStatus,
}

/// A posted project together with the proposals it has received.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngagementRecord {
    pub id: String,
    pub owner: PartySummary,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub responses: Vec<ResponseRecord>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl EngagementRecord {
    pub fn owner_id(&self) -> &str {
        &self.owner.id
    }

    pub fn is_participant(&self, party: &str) -> bool {
        self.owner.id == party || self.responses.iter().any(|r| r.responder.id == party)
    }

    pub fn latest_activity(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

/// Unordered pair of parties. Members are kept sorted so `{a, b}` and
/// `{b, a}` compare and hash equal.
///
/// `Ord` is member-wise and only serves as a map key; the inbox breaks
/// ordering ties on the rendered text instead. The text form is `low:high`
/// with `\` and `:` inside a member escaped by a backslash, so any pair of
/// ids survives a `to_string` / `parse` round trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationKey {
    low: String,
    high: String,
}

impl ConversationKey {
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
        let (a, b) = (a.into(), b.into());
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn parties(&self) -> (&str, &str) {
        (&self.low, &self.high)
    }

    pub fn contains(&self, party: &str) -> bool {
        self.low == party || self.high == party
    }

    /// The member that is not `party`, or `None` when `party` is not in the pair.
    pub fn other(&self, party: &str) -> Option<&str> {
        if self.low == party {
            Some(&self.high)
        } else if self.high == party {
            Some(&self.low)
        } else {
            None
        }
    }
}

fn escape_member(id: &str) -> String {
    id.replace('\\', "\\\\").replace(':', "\\:")
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", escape_member(&self.low), escape_member(&self.high))
    }
}

impl FromStr for ConversationKey {
    type Err = InboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InboxError::InvalidKey(s.to_string());
        let mut members = vec![String::new()];
        let mut chars = s.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => {
                    let escaped = chars.next().ok_or_else(invalid)?;
                    members.last_mut().ok_or_else(invalid)?.push(escaped);
                }
                ':' => members.push(String::new()),
                _ => members.last_mut().ok_or_else(invalid)?.push(c),
            }
        }
        match <[String; 2]>::try_from(members) {
            Ok([a, b]) if !a.is_empty() && !b.is_empty() => Ok(Self::new(a, b)),
            _ => Err(invalid()),
        }
    }
}

/// Storage address of one message log: an engagement scoped to a pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogKey {
    pub engagement_id: String,
    pub pair: ConversationKey,
}

impl LogKey {
    pub fn new(engagement_id: impl Into<String>, pair: ConversationKey) -> Self {
        Self {
            engagement_id: engagement_id.into(),
            pair,
        }
    }
}

/// Per-counterpart view over every log the viewer shares with them.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub key: ConversationKey,
    pub counterpart: PartySummary,
    pub messages: Vec<Message>,
    pub last_message: Option<Message>,
    pub unread_count: usize,
    pub engagement_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_unordered() {
        assert_eq!(ConversationKey::new("u2", "u1"), ConversationKey::new("u1", "u2"));
        assert_eq!(ConversationKey::new("u2", "u1").to_string(), "u1:u2");
    }

    #[test]
    fn key_other_member() {
        let key = ConversationKey::new("alice", "bob");
        assert_eq!(key.other("alice"), Some("bob"));
        assert_eq!(key.other("bob"), Some("alice"));
        assert_eq!(key.other("carol"), None);
    }

    #[test]
    fn key_parse() {
        let key: ConversationKey = "bob:alice".parse().unwrap();
        assert_eq!(key, ConversationKey::new("alice", "bob"));
        assert!("bob".parse::<ConversationKey>().is_err());
        assert!(":bob".parse::<ConversationKey>().is_err());
        assert!("a:b:c".parse::<ConversationKey>().is_err());
        assert!("a\\".parse::<ConversationKey>().is_err());
    }

    #[test]
    fn key_text_escapes_separator() {
        let key = ConversationKey::new("acme:42", "bob\\x");
        let text = key.to_string();
        assert_eq!(text, "acme\\:42:bob\\\\x");
        assert_eq!(text.parse::<ConversationKey>().unwrap(), key);
        assert_eq!(key.other("bob\\x"), Some("acme:42"));
    }

    #[test]
    fn engagement_from_api_json() {
        let json = r#"{
            "id": "p1",
            "owner": {"id": "u1", "name": "Client"},
            "title": "Landing page",
            "responses": [{
                "id": "r1",
                "responder": {"id": "u2", "name": "Dev", "online": true},
                "proposal": "I can do it",
                "price": 250.0,
                "status": "accepted"
            }],
            "createdAt": "2024-03-01T10:00:00Z"
        }"#;
        let record: EngagementRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.owner_id(), "u1");
        assert_eq!(record.responses[0].status, ResponseStatus::Accepted);
        assert!(record.is_participant("u2"));
        assert!(!record.is_participant("u3"));
        assert_eq!(record.latest_activity(), record.created_at);
    }
}
