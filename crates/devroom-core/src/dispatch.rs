//! The single event loop that owns all room and session state.
//!
//! Sockets, REST handlers and background tasks talk to it through a
//! [`DispatcherHandle`]. Long-running work (model calls, persistence, sandbox
//! runs) happens in spawned tasks that re-enter the loop by command, so the
//! loop itself never waits on I/O.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use devroom_types::{
    AiReply, ChatMessage, ClientEvent, CommandSpec, FileTree, MessageBody, ProjectId, RunRequest,
    SenderInfo, ServerEvent,
};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::directory::ProjectDirectory;
use crate::error::DispatchError;
use crate::file_tree::FileTreeState;
use crate::gateway::Admission;
use crate::pipeline::{AugmentationPipeline, FALLBACK_TEXT};
use crate::room::{ConnectionId, Delivery, Outbound, Room, RoomRegistry, SessionRegistry};
use crate::sandbox::{SandboxController, SandboxProvider};

/// How long the tree of a closed room is kept after its last write landed.
/// Covers a reconnect whose handshake read the store before that write.
const DORMANT_GRACE: Duration = Duration::from_secs(60);

/// Collaborators of the dispatcher.
pub struct DispatcherDeps {
    pub directory: Arc<dyn ProjectDirectory>,
    pub pipeline: AugmentationPipeline,
    pub sandbox: Arc<dyn SandboxProvider>,
}

/// Commands accepted by the dispatcher loop.
#[derive(Debug)]
pub enum DispatchCommand {
    /// Register an admitted connection and add it to its room.
    Join {
        admission: Box<Admission>,
        outbound: Outbound,
        ack: oneshot::Sender<()>,
    },
    Leave {
        connection: ConnectionId,
    },
    Chat {
        connection: ConnectionId,
        message: MessageBody,
        sender: Option<SenderInfo>,
    },
    EditFile {
        connection: ConnectionId,
        path: String,
        contents: String,
    },
    /// Full replace from outside a socket. Replies whether the dispatcher
    /// took the tree, i.e. the room is live or its closed state is still held.
    ReplaceTree {
        project_id: ProjectId,
        tree: FileTree,
        reply: oneshot::Sender<bool>,
    },
    /// A model call finished.
    AiCompleted {
        room_id: ProjectId,
        reply: AiReply,
    },
    RunSandbox {
        connection: ConnectionId,
        request: RunRequest,
    },
    /// Live tree of a room, `None` if the room is not active.
    Snapshot {
        project_id: ProjectId,
        reply: oneshot::Sender<Option<Arc<FileTree>>>,
    },
    Members {
        project_id: ProjectId,
        reply: oneshot::Sender<Vec<ConnectionId>>,
    },
    /// Store every held tree, then stop the loop.
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

/// Cloneable entry point to the dispatcher. The loop stops once every handle
/// is dropped.
#[derive(Clone, Debug)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<DispatchCommand>,
}

impl DispatcherHandle {
    /// Join and wait until the connection is registered, so that events it
    /// submits afterwards are ordered after the join.
    pub async fn join(&self, admission: Admission, outbound: Outbound) -> Result<(), DispatchError> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(DispatchCommand::Join {
                admission: Box::new(admission),
                outbound,
                ack,
            })
            .await?;
        Ok(done.await?)
    }

    /// True once the loop has stopped accepting commands.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub async fn leave(&self, connection: ConnectionId) -> Result<(), DispatchError> {
        Ok(self.tx.send(DispatchCommand::Leave { connection }).await?)
    }

    /// Route a client frame.
    pub async fn submit(&self, connection: ConnectionId, event: ClientEvent) -> Result<(), DispatchError> {
        let command = match event {
            ClientEvent::ProjectMessage { message, sender } => DispatchCommand::Chat {
                connection,
                message,
                sender,
            },
            ClientEvent::FileUpdate { path, contents } => DispatchCommand::EditFile {
                connection,
                path,
                contents,
            },
            ClientEvent::RunProject(request) => DispatchCommand::RunSandbox { connection, request },
        };
        Ok(self.tx.send(command).await?)
    }

    pub async fn replace_tree(&self, project_id: ProjectId, tree: FileTree) -> Result<bool, DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(DispatchCommand::ReplaceTree {
                project_id,
                tree,
                reply,
            })
            .await?;
        Ok(rx.await?)
    }

    pub async fn snapshot(&self, project_id: ProjectId) -> Result<Option<Arc<FileTree>>, DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(DispatchCommand::Snapshot { project_id, reply }).await?;
        Ok(rx.await?)
    }

    pub async fn members(&self, project_id: ProjectId) -> Result<Vec<ConnectionId>, DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(DispatchCommand::Members { project_id, reply }).await?;
        Ok(rx.await?)
    }

    /// Stop the loop once every live and closed room tree is stored.
    pub async fn shutdown(&self) -> Result<(), DispatchError> {
        let (ack, done) = oneshot::channel();
        self.tx.send(DispatchCommand::Shutdown { ack }).await?;
        Ok(done.await?)
    }
}

/// Tree of a closed room, kept so a quick reconnect continues from it
/// instead of a store read that may predate its last writes.
struct Dormant {
    tree: FileTreeState,
    closed_at: Instant,
}

impl Dormant {
    fn expired(&self) -> bool {
        self.tree.is_settled() && self.closed_at.elapsed() >= DORMANT_GRACE
    }
}

pub struct Dispatcher {
    sessions: SessionRegistry,
    rooms: RoomRegistry,
    dormant: HashMap<ProjectId, Dormant>,
    directory: Arc<dyn ProjectDirectory>,
    pipeline: AugmentationPipeline,
    sandbox: SandboxController,
    /// Lets spawned tasks report back without keeping the loop alive.
    weak: mpsc::WeakSender<DispatchCommand>,
}

impl Dispatcher {
    /// Spawn the loop and return a handle to it.
    ///
    /// * `queue_capacity` – maximum number of pending commands.
    pub fn start(deps: DispatcherDeps, queue_capacity: usize) -> DispatcherHandle {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let dispatcher = Self {
            sessions: SessionRegistry::default(),
            rooms: RoomRegistry::default(),
            dormant: HashMap::new(),
            directory: deps.directory,
            pipeline: deps.pipeline,
            sandbox: SandboxController::new(deps.sandbox),
            weak: tx.downgrade(),
        };
        tokio::spawn(dispatcher.run_loop(rx));
        DispatcherHandle { tx }
    }

    async fn run_loop(mut self, mut rx: mpsc::Receiver<DispatchCommand>) {
        let mut ack = None;
        while let Some(command) = rx.recv().await {
            if let ControlFlow::Break(done) = self.handle(command) {
                ack = Some(done);
                break;
            }
        }
        rx.close();
        info!(rooms = self.rooms.len(), sessions = self.sessions.len(), "dispatcher stopping");
        self.flush().await;
        info!("dispatcher stopped");
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }

    /// Close every tree state, waiting for its last snapshot to be stored.
    async fn flush(&mut self) {
        let trees = self
            .rooms
            .drain()
            .map(|room| room.tree)
            .chain(self.dormant.drain().map(|(_, dormant)| dormant.tree));
        for tree in trees.collect::<Vec<_>>() {
            tree.close().await;
        }
    }

    fn handle(&mut self, command: DispatchCommand) -> ControlFlow<oneshot::Sender<()>> {
        match command {
            DispatchCommand::Join {
                admission,
                outbound,
                ack,
            } => {
                self.on_join(*admission, outbound);
                let _ = ack.send(());
            }
            DispatchCommand::Leave { connection } => self.on_leave(connection),
            DispatchCommand::Chat {
                connection,
                message,
                sender,
            } => self.on_chat(connection, message, sender),
            DispatchCommand::EditFile {
                connection,
                path,
                contents,
            } => self.on_edit(connection, path, contents),
            DispatchCommand::ReplaceTree {
                project_id,
                tree,
                reply,
            } => {
                let _ = reply.send(self.on_replace(&project_id, tree));
            }
            DispatchCommand::AiCompleted { room_id, reply } => self.on_ai_completed(room_id, reply),
            DispatchCommand::RunSandbox { connection, request } => self.on_run(connection, request),
            DispatchCommand::Snapshot { project_id, reply } => {
                let _ = reply.send(self.rooms.get(&project_id).map(|room| room.tree.snapshot()));
            }
            DispatchCommand::Members { project_id, reply } => {
                let members = self
                    .rooms
                    .get(&project_id)
                    .map(|room| room.members().to_vec())
                    .unwrap_or_default();
                let _ = reply.send(members);
            }
            DispatchCommand::Shutdown { ack } => return ControlFlow::Break(ack),
        }
        ControlFlow::Continue(())
    }

    fn on_join(&mut self, admission: Admission, outbound: Outbound) {
        let Admission { session, project } = admission;
        let connection = session.connection_id;
        let room_id = session.room_id.clone();
        self.sessions.insert(session, outbound);

        self.prune_dormant();
        let directory = &self.directory;
        let dormant = &mut self.dormant;
        let room = self.rooms.join(&room_id, connection, || {
            if let Some(held) = dormant.remove(&room_id) {
                debug!(room = %room_id, version = held.tree.version(), "room reopened from held tree");
                return held.tree;
            }
            match project {
                Some(project) => FileTreeState::seeded(project.id, project.file_tree, Arc::clone(directory)),
                None => FileTreeState::detached(FileTree::new()),
            }
        });
        debug!(room = %room_id, %connection, members = room.members().len(), "connection registered");
    }

    fn on_leave(&mut self, connection: ConnectionId) {
        let Some(session) = self.sessions.remove(connection) else {
            return;
        };
        self.sandbox.cancel(connection);
        if let Some(room) = self.rooms.leave(&session.room_id, connection) {
            info!(room = %session.room_id, "room closed");
            self.hold(room);
        }
        info!(user = %session.user_id, room = %session.room_id, %connection, "user left room");
    }

    fn on_chat(&mut self, connection: ConnectionId, message: MessageBody, sender: Option<SenderInfo>) {
        let Some(session) = self.sessions.get(connection) else {
            debug!(%connection, "message from unknown connection dropped");
            return;
        };
        let sender = match sender {
            Some(sender) if sender.is_ai() => {
                warn!(user = %session.user_id, "client claimed the AI sender id");
                self.sessions.send_to(
                    connection,
                    ServerEvent::Error {
                        message: "sender id is reserved".into(),
                    },
                );
                return;
            }
            Some(sender) => sender,
            None => session.sender(),
        };
        let room_id = session.room_id.clone();
        let Some(room) = self.rooms.get(&room_id) else {
            return;
        };

        let prompt = self.pipeline.extract_prompt(&message);
        room.broadcast(
            &self.sessions,
            &ServerEvent::ProjectMessage(ChatMessage { message, sender }),
            Delivery::ExceptSender(connection),
        );

        if let Some(prompt) = prompt {
            info!(room = %room_id, %connection, "AI invoked");
            let pipeline = self.pipeline.clone();
            let weak = self.weak.clone();
            tokio::spawn(async move {
                let reply = pipeline.invoke(&prompt).await;
                match weak.upgrade() {
                    Some(tx) => {
                        let _ = tx.send(DispatchCommand::AiCompleted { room_id, reply }).await;
                    }
                    None => debug!(room = %room_id, "dispatcher gone, AI reply dropped"),
                }
            });
        }
    }

    fn on_edit(&mut self, connection: ConnectionId, path: String, contents: String) {
        let Some(session) = self.sessions.get(connection) else {
            return;
        };
        let sender = session.sender();
        let Some(room) = self.rooms.get_mut(&session.room_id) else {
            return;
        };
        match room.tree.write_file(&path, &contents) {
            Ok(()) => {
                room.broadcast(
                    &self.sessions,
                    &ServerEvent::FileUpdated {
                        path,
                        contents,
                        sender,
                    },
                    Delivery::ExceptSender(connection),
                );
            }
            Err(e) => {
                self.sessions.send_to(
                    connection,
                    ServerEvent::Error {
                        message: e.to_string(),
                    },
                );
            }
        }
    }

    /// Keep the tree of a closed room until its writes land and the grace
    /// period passes.
    fn hold(&mut self, room: Room) {
        self.prune_dormant();
        self.dormant.insert(
            room.id,
            Dormant {
                tree: room.tree,
                closed_at: Instant::now(),
            },
        );
    }

    fn prune_dormant(&mut self) {
        self.dormant.retain(|_, held| !held.expired());
    }

    fn on_replace(&mut self, project_id: &ProjectId, tree: FileTree) -> bool {
        let Some(room) = self.rooms.get_mut(project_id) else {
            return match self.dormant.get_mut(project_id) {
                Some(held) => {
                    held.tree.replace(tree);
                    true
                }
                None => false,
            };
        };
        room.tree.replace(tree);
        let event = ServerEvent::FileTree {
            file_tree: (*room.tree.snapshot()).clone(),
        };
        room.broadcast(&self.sessions, &event, Delivery::Everyone);
        true
    }

    fn on_ai_completed(&mut self, room_id: ProjectId, reply: AiReply) {
        let message = match serde_json::to_value(&reply) {
            Ok(value) => MessageBody::Structured(value),
            Err(e) => {
                warn!(error = %e, "failed to encode AI reply");
                MessageBody::from(FALLBACK_TEXT)
            }
        };
        let event = ServerEvent::ProjectMessage(ChatMessage {
            message,
            sender: SenderInfo::ai(),
        });

        let AiReply {
            file_tree,
            build_command,
            start_command,
            ..
        } = reply;

        let Some(room) = self.rooms.get_mut(&room_id) else {
            if let Some(tree) = file_tree {
                match self.dormant.get_mut(&room_id) {
                    Some(held) => held.tree.replace(tree),
                    None => self.persist_detached(room_id, tree),
                }
            }
            return;
        };
        if let Some(tree) = file_tree {
            room.tree.replace(tree);
        }
        if build_command.is_some() {
            room.build_command = build_command;
        }
        if start_command.is_some() {
            room.start_command = start_command;
        }
        let delivered = room.broadcast(&self.sessions, &event, Delivery::Everyone);
        debug!(room = %room_id, delivered, "AI reply broadcast");
    }

    /// Store a tree for a room that has no live state.
    fn persist_detached(&self, room_id: ProjectId, tree: FileTree) {
        let directory = Arc::clone(&self.directory);
        tokio::spawn(async move {
            match directory.persist_file_tree(&room_id, &tree).await {
                Ok(()) => debug!(room = %room_id, "AI tree persisted after room closed"),
                Err(e) => warn!(room = %room_id, error = %e, "failed to persist file tree"),
            }
        });
    }

    fn on_run(&mut self, connection: ConnectionId, request: RunRequest) {
        let Some(session) = self.sessions.get(connection) else {
            return;
        };
        let (Some(room), Some(outbound)) = (self.rooms.get(&session.room_id), self.sessions.outbound(connection))
        else {
            return;
        };
        let install = request
            .build_command
            .or_else(|| room.build_command.clone())
            .unwrap_or_else(CommandSpec::default_install);
        let start = request
            .start_command
            .or_else(|| room.start_command.clone())
            .unwrap_or_else(CommandSpec::default_start);
        info!(room = %room.id, %connection, %install, %start, "sandbox run requested");

        self.sandbox
            .run(connection, room.tree.snapshot(), install, start, outbound.clone());
    }
}
