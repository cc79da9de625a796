use serde::{Deserialize, Serialize};

use crate::file_tree::FileTree;

/// Reserved sender id of the synthetic AI participant.
pub const AI_SENDER_ID: &str = "ai";
/// Display email of the synthetic AI participant.
pub const AI_SENDER_EMAIL: &str = "AI";

/// Identity attached to every chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderInfo {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub email: String,
}

impl SenderInfo {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
        }
    }

    pub fn ai() -> Self {
        Self::new(AI_SENDER_ID, AI_SENDER_EMAIL)
    }

    pub fn is_ai(&self) -> bool {
        self.id == AI_SENDER_ID
    }
}

/// Chat content: plain text from people, structured JSON from the AI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageBody {
    Text(String),
    Structured(serde_json::Value),
}

impl MessageBody {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageBody::Text(text) => Some(text),
            MessageBody::Structured(_) => None,
        }
    }
}

impl From<&str> for MessageBody {
    fn from(text: &str) -> Self {
        MessageBody::Text(text.to_owned())
    }
}

impl From<String> for MessageBody {
    fn from(text: String) -> Self {
        MessageBody::Text(text)
    }
}

/// A `project-message` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message: MessageBody,
    pub sender: SenderInfo,
}

/// Program plus arguments, in the shape the model emits
/// (`{"mainItem": "npm", "commands": ["install"]}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandSpec {
    pub main_item: String,
    #[serde(default)]
    pub commands: Vec<String>,
}

impl CommandSpec {
    pub fn new<I, S>(main_item: impl Into<String>, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            main_item: main_item.into(),
            commands: commands.into_iter().map(Into::into).collect(),
        }
    }

    /// `npm install`
    pub fn default_install() -> Self {
        Self::new("npm", ["install"])
    }

    /// `npm start`
    pub fn default_start() -> Self {
        Self::new("npm", ["start"])
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.main_item)?;
        for arg in &self.commands {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Structured reply of the generative model.
///
/// Keys other than the four known ones are kept in `extra` and relayed
/// untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiReply {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_tree: Option<FileTree>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_command: Option<CommandSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_command: Option<CommandSpec>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AiReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}
