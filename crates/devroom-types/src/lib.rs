//! Wire and domain types shared by the devroom core and server.
//!
//! Everything here is plain data with a stable JSON shape; behaviour lives in
//! `devroom-core`.

mod event;
mod file_tree;
mod message;
mod project;

pub use event::{ClientEvent, OutputStream, RunRequest, ServerEvent};
pub use file_tree::{FileNode, FileTree};
pub use message::{
    AI_SENDER_EMAIL, AI_SENDER_ID, AiReply, ChatMessage, CommandSpec, MessageBody, SenderInfo,
};
pub use project::{InvalidProjectId, Project, ProjectId};
