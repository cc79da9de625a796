//! Realtime collaboration core.
//!
//! A [`ConnectionGateway`] admits authenticated connections into project
//! rooms. A single [`Dispatcher`] task owns every room: it relays chat, hands
//! marked messages to the [`AugmentationPipeline`], applies file tree writes
//! (persisted in the background) and starts sandbox runs for the invoking
//! connection.

pub mod auth;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod file_tree;
pub mod gateway;
pub mod pipeline;
pub mod room;
pub mod sandbox;

pub use auth::{Claims, JwtVerifier, TokenVerifier, bearer_token};
pub use directory::{InMemoryDirectory, ProjectDirectory};
pub use dispatch::{DispatchCommand, Dispatcher, DispatcherDeps, DispatcherHandle};
pub use error::{AuthError, DispatchError, GatewayError, ModelError, PersistenceError, SandboxError};
pub use file_tree::{FileTreeState, PathError, TreePersister};
pub use gateway::{Admission, ConnectionGateway, HandshakeRequest, Session};
pub use pipeline::{AugmentationPipeline, DEFAULT_MARKER, FALLBACK_TEXT, ModelService};
pub use room::{ConnectionId, Delivery, Outbound};
pub use sandbox::{
    DEFAULT_PROGRAMS, DisabledSandboxProvider, LocalSandboxProvider, ProcessHandle, SandboxController,
    SandboxProvider, SandboxRuntime, SandboxStep, ServerReady, SpawnedProcess,
};
