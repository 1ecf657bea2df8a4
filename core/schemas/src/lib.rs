use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// ID Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExchangeId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Exchange Schema
// ============================================================================

/// One user turn and its AI reply. The relational row is the source of
/// truth for ordering and delete flags; the vector store only mirrors it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatExchange {
    pub id: ExchangeId,
    pub user_id: UserId,
    pub message: String,
    pub response: String,
    pub created_at: String, // RFC3339
    pub is_deleted: bool,
}

impl ChatExchange {
    /// Text form stored in the vector index, combining both halves of the
    /// exchange the way it was shown to the model.
    pub fn memory_document(&self) -> String {
        format!("User said: {}\nAI replied: {}", self.message, self.response)
    }
}

// ============================================================================
// Moderation Schema
// ============================================================================

/// Append-only audit record. Carries reason codes only, never raw text,
/// so the trail survives permanent content deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationLogEntry {
    pub id: i64,
    pub exchange_id: ExchangeId,
    pub flag_reason: String,
    pub flagged_at: String, // RFC3339
}

// ============================================================================
// Prompt Messages
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageRole {
    #[serde(rename = "system")]
    System,
    #[serde(rename = "user")]
    User,
    #[serde(rename = "assistant")]
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

// ============================================================================
// History Views
// ============================================================================

/// Visibility filter applied to every history read path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryFilter {
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "deleted")]
    Deleted,
    #[serde(rename = "all")]
    All,
}

impl HistoryFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryFilter::Active => "active",
            HistoryFilter::Deleted => "deleted",
            HistoryFilter::All => "all",
        }
    }
}

impl FromStr for HistoryFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(HistoryFilter::Active),
            "deleted" => Ok(HistoryFilter::Deleted),
            "all" => Ok(HistoryFilter::All),
            other => Err(format!("unknown history filter: {}", other)),
        }
    }
}

/// User-facing view of one exchange. Never exposes the delete flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeView {
    pub id: ExchangeId,
    pub message: String,
    pub response: String,
    pub created_at: String,
}

impl From<ChatExchange> for ExchangeView {
    fn from(exchange: ChatExchange) -> Self {
        Self {
            id: exchange.id,
            message: exchange.message,
            response: exchange.response,
            created_at: exchange.created_at,
        }
    }
}

/// User-facing history page: active exchanges only, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    pub exchanges: Vec<ExchangeView>,
    pub total: u64,
}

/// Admin history page: exchanges carry their delete flag, and both
/// per-state counts are reported alongside the filtered total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminHistoryPage {
    pub exchanges: Vec<ChatExchange>,
    pub total: u64,
    pub active_count: u64,
    pub deleted_count: u64,
}

// ============================================================================
// Summary Schema
// ============================================================================

/// Abstractive emotional-status summary handed to an administrator.
/// When a user has no active history, `insufficient_data` is set and no
/// provider call was made.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryReport {
    pub user_id: UserId,
    pub summary: String,
    pub message_count: u64,
    pub generated_at: String, // RFC3339
    pub insufficient_data: bool,
}

impl SummaryReport {
    pub fn insufficient_data(user_id: UserId, display_name: &str) -> Self {
        Self {
            user_id,
            summary: format!(
                "{} has no recent conversation history to analyse.",
                display_name
            ),
            message_count: 0,
            generated_at: now_rfc3339(),
            insufficient_data: true,
        }
    }
}

// ============================================================================
// Deletion Schema
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionReport {
    pub user_id: UserId,
    pub removed: u64,
    pub permanent: bool,
}

// ============================================================================
// API Request Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

// ============================================================================
// Helper Functions
// ============================================================================

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_serialization() {
        let exchange = ChatExchange {
            id: ExchangeId(7),
            user_id: UserId(1),
            message: "Hello".to_string(),
            response: "Hi there!".to_string(),
            created_at: "2025-11-02T18:00:00Z".to_string(),
            is_deleted: false,
        };

        let json = serde_json::to_string(&exchange).unwrap();
        let deserialized: ChatExchange = serde_json::from_str(&json).unwrap();
        assert_eq!(exchange.message, deserialized.message);
        assert_eq!(exchange.id, deserialized.id);
        assert!(!deserialized.is_deleted);
    }

    #[test]
    fn test_memory_document_contains_both_halves() {
        let exchange = ChatExchange {
            id: ExchangeId(1),
            user_id: UserId(1),
            message: "I planted tomatoes today".to_string(),
            response: "That sounds lovely!".to_string(),
            created_at: "2025-11-02T18:00:00Z".to_string(),
            is_deleted: false,
        };

        let doc = exchange.memory_document();
        assert!(doc.contains("I planted tomatoes today"));
        assert!(doc.contains("That sounds lovely!"));
    }

    #[test]
    fn test_history_filter_round_trip() {
        for filter in [
            HistoryFilter::Active,
            HistoryFilter::Deleted,
            HistoryFilter::All,
        ] {
            let parsed: HistoryFilter = filter.as_str().parse().unwrap();
            assert_eq!(parsed, filter);
        }

        assert!("everything".parse::<HistoryFilter>().is_err());
    }

    #[test]
    fn test_exchange_view_hides_delete_flag() {
        let exchange = ChatExchange {
            id: ExchangeId(3),
            user_id: UserId(2),
            message: "m".to_string(),
            response: "r".to_string(),
            created_at: "2025-11-02T18:00:00Z".to_string(),
            is_deleted: true,
        };

        let view = ExchangeView::from(exchange);
        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("is_deleted").is_none());
    }

    #[test]
    fn test_insufficient_data_summary() {
        let report = SummaryReport::insufficient_data(UserId(5), "Margaret");
        assert!(report.insufficient_data);
        assert_eq!(report.message_count, 0);
        assert!(report.summary.contains("Margaret"));
    }
}
