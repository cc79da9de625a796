//! Socket frames.
//!
//! Every frame is `{"event": "<name>", "data": <payload>}`.

use serde::{Deserialize, Serialize};

use crate::file_tree::FileTree;
use crate::message::{ChatMessage, CommandSpec, MessageBody, SenderInfo};

/// Overrides for a sandbox run; missing commands fall back to the room's
/// last AI-provided commands, then to `npm install` / `npm start`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_command: Option<CommandSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_command: Option<CommandSpec>,
}

/// Frames sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    ProjectMessage {
        message: MessageBody,
        /// Relayed as given; filled from the session when absent.
        #[serde(default)]
        sender: Option<SenderInfo>,
    },
    FileUpdate {
        path: String,
        contents: String,
    },
    RunProject(RunRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    ProjectMessage(ChatMessage),
    FileUpdated {
        path: String,
        contents: String,
        sender: SenderInfo,
    },
    FileTree {
        #[serde(rename = "fileTree")]
        file_tree: FileTree,
    },
    SandboxOutput {
        stream: OutputStream,
        chunk: String,
    },
    SandboxReady {
        port: u16,
        url: String,
    },
    SandboxExit {
        code: Option<i32>,
    },
    SandboxError {
        step: String,
        message: String,
    },
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_message_frame() {
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "project-message",
            "data": { "message": "hi", "sender": { "_id": "u1", "email": "a@x.io" } }
        }))
        .unwrap();

        assert_eq!(
            event,
            ClientEvent::ProjectMessage {
                message: MessageBody::Text("hi".into()),
                sender: Some(SenderInfo::new("u1", "a@x.io")),
            }
        );
    }

    #[test]
    fn run_project_with_commands() {
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "run-project",
            "data": { "startCommand": { "mainItem": "node", "commands": ["app.js"] } }
        }))
        .unwrap();

        let ClientEvent::RunProject(request) = event else {
            panic!("expected run-project");
        };
        assert_eq!(request.start_command, Some(CommandSpec::new("node", ["app.js"])));
        assert!(request.build_command.is_none());
    }

    #[test]
    fn server_frames_are_kebab_case() {
        let frame = serde_json::to_value(ServerEvent::SandboxReady {
            port: 3000,
            url: "http://127.0.0.1:3000".into(),
        })
        .unwrap();
        assert_eq!(frame["event"], "sandbox-ready");
        assert_eq!(frame["data"]["port"], 3000);

        let frame = serde_json::to_value(ServerEvent::FileTree {
            file_tree: FileTree::new(),
        })
        .unwrap();
        assert_eq!(frame, json!({ "event": "file-tree", "data": { "fileTree": {} } }));
    }
}
