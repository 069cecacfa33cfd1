//! Wire types for the webhook API (catalog, history, chat).

use serde::{Deserialize, Deserializer, Serialize};

/// Deserialize an identifier that the server may send as a JSON string or number.
pub fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Str(String),
        Int(i64),
        Uint(u64),
        Float(f64),
    }
    Ok(match Id::deserialize(deserializer)? {
        Id::Str(s) => s,
        Id::Int(n) => n.to_string(),
        Id::Uint(n) => n.to_string(),
        Id::Float(n) => n.to_string(),
    })
}

/// Explore category tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tab {
    pub category_id: i64,
    pub category_name: String,
    /// Display order (ascending).
    #[serde(default)]
    pub sequence: i64,
}

impl Tab {
    pub fn new(category_id: i64, category_name: impl Into<String>, sequence: i64) -> Self {
        Self {
            category_id,
            category_name: category_name.into(),
            sequence,
        }
    }
}

/// Order tabs by `sequence`; equal sequences keep server order.
pub fn sort_tabs(tabs: &mut [Tab]) {
    tabs.sort_by_key(|t| t.sequence);
}

/// Agent summary as listed in the catalog grid and the sidebar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub icon_url: String,
    #[serde(default)]
    pub description: String,
}

impl Agent {
    /// Case-insensitive match on name, provider, or description. Empty query matches everything.
    pub fn matches(&self, query: &str) -> bool {
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return true;
        }
        self.name.to_lowercase().contains(&q)
            || self.provider.to_lowercase().contains(&q)
            || self.description.to_lowercase().contains(&q)
    }
}

/// Extended agent information shown in the detail panel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentDetail {
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub conversation_count: Option<u64>,
    #[serde(default)]
    pub conversation_starters: Vec<String>,
}

/// One chat in the sidebar history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatHistoryEntry {
    #[serde(deserialize_with = "id_string")]
    pub chat_id: String,
    #[serde(default)]
    pub title: String,
}

/// Time bucket a history entry is listed under. Assigned by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistoryBucket {
    Today,
    Previous7Days,
    Previous30Days,
}

impl HistoryBucket {
    pub const ALL: [HistoryBucket; 3] = [
        HistoryBucket::Today,
        HistoryBucket::Previous7Days,
        HistoryBucket::Previous30Days,
    ];

    pub fn label(self) -> &'static str {
        match self {
            HistoryBucket::Today => "Today",
            HistoryBucket::Previous7Days => "Previous 7 days",
            HistoryBucket::Previous30Days => "Previous 30 days",
        }
    }
}

/// Chat history grouped by bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatHistory {
    #[serde(default)]
    pub today: Vec<ChatHistoryEntry>,
    #[serde(default)]
    pub previous_7_days: Vec<ChatHistoryEntry>,
    #[serde(default)]
    pub previous_30_days: Vec<ChatHistoryEntry>,
}

impl ChatHistory {
    pub fn bucket(&self, bucket: HistoryBucket) -> &[ChatHistoryEntry] {
        match bucket {
            HistoryBucket::Today => &self.today,
            HistoryBucket::Previous7Days => &self.previous_7_days,
            HistoryBucket::Previous30Days => &self.previous_30_days,
        }
    }

    /// Non-empty buckets in display order.
    pub fn buckets(&self) -> impl Iterator<Item = (HistoryBucket, &[ChatHistoryEntry])> {
        HistoryBucket::ALL
            .into_iter()
            .map(move |b| (b, self.bucket(b)))
            .filter(|(_, entries)| !entries.is_empty())
    }

    pub fn find(&self, chat_id: &str) -> Option<(HistoryBucket, &ChatHistoryEntry)> {
        HistoryBucket::ALL.into_iter().find_map(|b| {
            self.bucket(b)
                .iter()
                .find(|e| e.chat_id == chat_id)
                .map(|e| (b, e))
        })
    }

    pub fn len(&self) -> usize {
        self.today.len() + self.previous_7_days.len() + self.previous_30_days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy keeping only entries whose title contains `query` (case-insensitive).
    pub fn filtered(&self, query: &str) -> ChatHistory {
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return self.clone();
        }
        let keep = |entries: &[ChatHistoryEntry]| {
            entries
                .iter()
                .filter(|e| e.title.to_lowercase().contains(&q))
                .cloned()
                .collect()
        };
        ChatHistory {
            today: keep(&self.today),
            previous_7_days: keep(&self.previous_7_days),
            previous_30_days: keep(&self.previous_30_days),
        }
    }
}

/// Author of a chat message. Anything the server does not call `ai` is shown as the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Role {
    Ai,
    User,
}

impl From<String> for Role {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "ai" | "assistant" => Role::Ai,
            _ => Role::User,
        }
    }
}

/// One message in a chat transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
}

impl Message {
    pub fn ai(content: impl Into<String>) -> Self {
        Self {
            role: Role::Ai,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Body of `POST /chat/newid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChat {
    pub user_id: String,
    pub agent_id: String,
    pub chat_name: String,
    pub agent_name: String,
}

/// Response of `POST /chat/newid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedChat {
    #[serde(deserialize_with = "id_string")]
    pub chat_id: String,
}

/// Body of `POST /chatbot`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub message: String,
    pub user_id: String,
    pub chat_id: String,
    /// True when the message was sent on the user's behalf (e.g. a conversation starter).
    pub is_action: bool,
    /// RFC 3339 client timestamp.
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tabs_sort_by_sequence() {
        let mut tabs: Vec<Tab> = serde_json::from_str(
            r#"[{"category_id":1,"category_name":"A","sequence":2},
                {"category_id":2,"category_name":"B","sequence":1}]"#,
        )
        .unwrap();
        sort_tabs(&mut tabs);
        let names: Vec<_> = tabs.iter().map(|t| t.category_name.as_str()).collect();
        assert_eq!(names, ["B", "A"]);
    }

    #[test]
    fn tab_sort_is_stable_on_ties() {
        let mut tabs = vec![Tab::new(1, "X", 1), Tab::new(2, "Y", 1), Tab::new(3, "Z", 0)];
        sort_tabs(&mut tabs);
        let ids: Vec<_> = tabs.iter().map(|t| t.category_id).collect();
        assert_eq!(ids, [3, 1, 2]);
    }

    #[test]
    fn ids_accept_numbers_and_strings() {
        let a: Agent = serde_json::from_str(r#"{"id":5,"name":"Coach"}"#).unwrap();
        assert_eq!(a.id, "5");
        assert_eq!(a.provider, "");
        let e: ChatHistoryEntry =
            serde_json::from_str(r#"{"chat_id":"c-9","title":"Hi"}"#).unwrap();
        assert_eq!(e.chat_id, "c-9");
        let c: CreatedChat = serde_json::from_str(r#"{"chatId":42}"#).unwrap();
        assert_eq!(c.chat_id, "42");
    }

    #[test]
    fn history_tolerates_missing_buckets() {
        let h: ChatHistory =
            serde_json::from_str(r#"{"today":[{"chat_id":1,"title":"One"}]}"#).unwrap();
        assert_eq!(h.len(), 1);
        let buckets: Vec<_> = h.buckets().map(|(b, _)| b).collect();
        assert_eq!(buckets, [HistoryBucket::Today]);
        assert_eq!(h.find("1").map(|(b, e)| (b, e.title.as_str())), Some((HistoryBucket::Today, "One")));
        assert!(h.find("2").is_none());
    }

    #[test]
    fn history_filter_by_title() {
        let h = ChatHistory {
            today: vec![ChatHistoryEntry {
                chat_id: "1".into(),
                title: "Career plan".into(),
            }],
            previous_7_days: vec![ChatHistoryEntry {
                chat_id: "2".into(),
                title: "Sleep habits".into(),
            }],
            previous_30_days: vec![],
        };
        let f = h.filtered("CAREER");
        assert_eq!(f.len(), 1);
        assert_eq!(f.today[0].chat_id, "1");
        assert_eq!(h.filtered("  ").len(), 2);
    }

    #[test]
    fn role_from_wire() {
        let m: Message = serde_json::from_str(r#"{"role":"ai","content":"hi"}"#).unwrap();
        assert_eq!(m.role, Role::Ai);
        let m: Message = serde_json::from_str(r#"{"role":"human","content":"yo"}"#).unwrap();
        assert_eq!(m.role, Role::User);
        assert_eq!(serde_json::to_value(Role::Ai).unwrap(), "ai");
    }

    #[test]
    fn outgoing_message_uses_camel_case() {
        let body = OutgoingMessage {
            message: "Hello".into(),
            user_id: "u".into(),
            chat_id: "c".into(),
            is_action: true,
            timestamp: "2026-01-01T00:00:00Z".into(),
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["isAction"], true);
        assert_eq!(v["chatId"], "c");
        assert_eq!(v["userId"], "u");
    }

    #[test]
    fn agent_search_matches_fields() {
        let a = Agent {
            id: "1".into(),
            name: "Mentor Karier".into(),
            provider: "Coachbot".into(),
            icon_url: String::new(),
            description: "Helps you plan your next job".into(),
        };
        assert!(a.matches(""));
        assert!(a.matches("karier"));
        assert!(a.matches("coachBOT"));
        assert!(a.matches("next job"));
        assert!(!a.matches("finance"));
    }
}
