//! Core type definitions for the conversation log and reviewer decisions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reviewer verdict on the current draft
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Approve,
    /// Initial value, so the loop always enters at least one write/review cycle
    #[default]
    Revise,
}

impl Decision {
    /// Map a raw extraction label onto a decision.
    ///
    /// Only an unambiguous `APPROVE` or `REVISE` (case-insensitive, surrounding
    /// quotes and punctuation ignored) is recognized. Anything else resolves to
    /// `Revise` with `recognized == false`.
    pub fn classify(raw: &str) -> Classification {
        let label = raw
            .trim()
            .trim_matches(|c: char| !c.is_ascii_alphanumeric())
            .to_ascii_uppercase();

        match label.as_str() {
            "APPROVE" | "APPROVED" => Classification {
                decision: Decision::Approve,
                recognized: true,
            },
            "REVISE" | "REVISION" => Classification {
                decision: Decision::Revise,
                recognized: true,
            },
            _ => Classification {
                decision: Decision::Revise,
                recognized: false,
            },
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approve => write!(f, "APPROVE"),
            Self::Revise => write!(f, "REVISE"),
        }
    }
}

impl std::str::FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "APPROVE" => Ok(Self::Approve),
            "REVISE" => Ok(Self::Revise),
            _ => Err(format!("Invalid decision: {}", s)),
        }
    }
}

/// Outcome of classifying a raw extraction label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub decision: Decision,
    /// False when the label was ambiguous and the REVISE default was applied
    pub recognized: bool,
}

/// Who authored a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Author {
    Human,
    Writer,
    Reviewer,
}

impl std::fmt::Display for Author {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Human => write!(f, "human"),
            Self::Writer => write!(f, "writer"),
            Self::Reviewer => write!(f, "reviewer"),
        }
    }
}

/// A single authored entry in the conversation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub author: Author,
    pub content: String,
    pub recorded_at: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(author: Author, content: impl Into<String>) -> Self {
        Self {
            author,
            content: content.into(),
            recorded_at: Utc::now(),
        }
    }
}

/// Ordered, append-only record of everything said during a conversation
///
/// Entries can be appended and read, never edited or removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationLog(Vec<LogEntry>);

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, author: Author, content: impl Into<String>) {
        self.0.push(LogEntry::new(author, content));
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.0.iter()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.0.last()
    }

    /// Entries written by one author, in order
    pub fn entries_by(&self, author: Author) -> impl Iterator<Item = &LogEntry> {
        self.0.iter().filter(move |e| e.author == author)
    }

    /// Whether any entry contains `needle`
    pub fn contains_text(&self, needle: &str) -> bool {
        self.0.iter().any(|e| e.content.contains(needle))
    }
}
