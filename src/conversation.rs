use std::{collections::HashMap, fmt::Display, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A [ChatHistory] is the shared, append-only log of a group chat.
///
/// Insertion order is conversation order. Messages are never removed,
/// replaced or reordered; the only way in is through the chat that owns the
/// history.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ChatHistory {
    messages: Vec<ChatMessage>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
        }
    }

    /// Append a message, assigning the next ordinal.
    pub(crate) fn push(
        &mut self,
        role: Role,
        author_name: Option<String>,
        content: Content,
    ) -> &ChatMessage {
        let message = ChatMessage {
            ordinal: self.messages.len(),
            role,
            author_name,
            content,
            timestamp: Utc::now(),
        };
        self.messages.push(message);
        &self.messages[self.messages.len() - 1]
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// Query a message in the conversation history.
    pub fn get(&self, ordinal: usize) -> Option<&ChatMessage> {
        self.messages.get(ordinal)
    }

    /// A frozen copy handed to agents while the chat keeps appending.
    pub fn snapshot(&self) -> Arc<[ChatMessage]> {
        Arc::from(self.messages.as_slice())
    }

    /// Search for a message in the conversation history.
    pub fn search(&self, keyword: &str) -> Vec<&ChatMessage> {
        self.messages
            .iter()
            .filter(|message| message.content.to_string().contains(keyword))
            .collect()
    }

    /// Count the number of messages by role
    pub fn count_messages_by_role(&self) -> HashMap<Role, usize> {
        let mut count = HashMap::new();
        for message in &self.messages {
            *count.entry(message.role).or_insert(0) += 1;
        }
        count
    }

    /// Convert the conversation history to a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.messages)
    }
}

/// A [ChatMessage] is one immutable entry of a [ChatHistory].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub ordinal: usize,
    pub role: Role,
    /// The agent that produced the message, if any.
    pub author_name: Option<String>,
    pub content: Content,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn text(&self) -> String {
        self.content.to_string()
    }

    /// Whether `name` authored this message as an assistant.
    pub fn is_from_agent(&self, name: &str) -> bool {
        self.role == Role::Assistant && self.author_name.as_deref() == Some(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type", content = "value")]
pub enum Content {
    Text(String),
    Structured(serde_json::Value),
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Content::Text(text)
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Content::Text(text.to_owned())
    }
}

impl From<serde_json::Value> for Content {
    fn from(value: serde_json::Value) -> Self {
        Content::Structured(value)
    }
}

impl Display for ChatHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for message in &self.messages {
            writeln!(f, "{message}")?;
        }
        Ok(())
    }
}

impl Display for ChatMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.author_name {
            Some(name) => write!(f, "{name}({}): {}", self.role, self.content),
            None => write!(f, "{}: {}", self.role, self.content),
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => f.pad("User"),
            Role::Assistant => f.pad("Assistant"),
            Role::System => f.pad("System"),
        }
    }
}

impl Display for Content {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Content::Text(text) => f.pad(text),
            Content::Structured(value) => write!(f, "{value}"),
        }
    }
}
