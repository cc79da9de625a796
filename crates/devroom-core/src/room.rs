//! Session and room registries plus room-scoped broadcast.
//!
//! Both registries are owned by the dispatcher task and are never shared, so
//! they use plain maps.

use std::collections::HashMap;
use std::fmt;

use devroom_types::{CommandSpec, ProjectId, ServerEvent};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::file_tree::FileTreeState;
use crate::gateway::Session;

/// Identity of one live socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Per-connection outbound queue. Unbounded so the dispatcher never waits on
/// a slow client.
pub type Outbound = mpsc::UnboundedSender<ServerEvent>;

/// Who receives a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Everyone,
    ExceptSender(ConnectionId),
}

struct Entry {
    session: Session,
    outbound: Outbound,
}

/// Live sessions by connection id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: HashMap<ConnectionId, Entry>,
}

impl SessionRegistry {
    pub fn insert(&mut self, session: Session, outbound: Outbound) {
        self.sessions
            .insert(session.connection_id, Entry { session, outbound });
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<Session> {
        self.sessions.remove(&id).map(|e| e.session)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Session> {
        self.sessions.get(&id).map(|e| &e.session)
    }

    pub fn outbound(&self, id: ConnectionId) -> Option<&Outbound> {
        self.sessions.get(&id).map(|e| &e.outbound)
    }

    /// Queue `event` for one connection. Returns `false` if it is gone.
    pub fn send_to(&self, id: ConnectionId, event: ServerEvent) -> bool {
        match self.sessions.get(&id) {
            Some(entry) => entry.outbound.send(event).is_ok(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// A project's live collaboration context.
pub struct Room {
    pub id: ProjectId,
    /// Members in join order.
    members: Vec<ConnectionId>,
    pub tree: FileTreeState,
    /// Commands from the most recent AI reply that carried them.
    pub build_command: Option<CommandSpec>,
    pub start_command: Option<CommandSpec>,
}

impl Room {
    fn new(id: ProjectId, tree: FileTreeState) -> Self {
        Self {
            id,
            members: Vec::new(),
            tree,
            build_command: None,
            start_command: None,
        }
    }

    pub fn members(&self) -> &[ConnectionId] {
        &self.members
    }

    /// Queue `event` for every member selected by `delivery`, each exactly
    /// once, in join order. Returns the number of queues written.
    pub fn broadcast(&self, sessions: &SessionRegistry, event: &ServerEvent, delivery: Delivery) -> usize {
        let mut delivered = 0;
        for member in &self.members {
            if delivery == Delivery::ExceptSender(*member) {
                continue;
            }
            match sessions.outbound(*member) {
                Some(outbound) if outbound.send(event.clone()).is_ok() => delivered += 1,
                _ => debug!(room = %self.id, connection = %member, "skipping closed member"),
            }
        }
        delivered
    }
}

/// Live rooms by project id. A room exists while it has members.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: HashMap<ProjectId, Room>,
}

impl RoomRegistry {
    /// Add `member` to `room_id`, creating the room with `seed` on first join.
    pub fn join(
        &mut self,
        room_id: &ProjectId,
        member: ConnectionId,
        seed: impl FnOnce() -> FileTreeState,
    ) -> &mut Room {
        let room = self
            .rooms
            .entry(room_id.clone())
            .or_insert_with(|| Room::new(room_id.clone(), seed()));
        if !room.members.contains(&member) {
            room.members.push(member);
        }
        room
    }

    /// Remove `member`; drops and returns the room once it is empty.
    pub fn leave(&mut self, room_id: &ProjectId, member: ConnectionId) -> Option<Room> {
        let room = self.rooms.get_mut(room_id)?;
        room.members.retain(|m| *m != member);
        if room.members.is_empty() {
            self.rooms.remove(room_id)
        } else {
            None
        }
    }

    pub fn get(&self, room_id: &ProjectId) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn get_mut(&mut self, room_id: &ProjectId) -> Option<&mut Room> {
        self.rooms.get_mut(room_id)
    }

    /// Remove every room, members included.
    pub fn drain(&mut self) -> impl Iterator<Item = Room> + '_ {
        self.rooms.drain().map(|(_, room)| room)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devroom_types::FileTree;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn session(room: &ProjectId, user: &str) -> Session {
        Session {
            connection_id: ConnectionId::new(),
            user_id: user.into(),
            user_email: format!("{user}@x.io"),
            project_id: room.clone(),
            room_id: room.clone(),
        }
    }

    fn joined(
        sessions: &mut SessionRegistry,
        rooms: &mut RoomRegistry,
        room: &ProjectId,
        user: &str,
    ) -> (ConnectionId, UnboundedReceiver<ServerEvent>) {
        let s = session(room, user);
        let id = s.connection_id;
        let (tx, rx) = mpsc::unbounded_channel();
        sessions.insert(s, tx);
        rooms.join(room, id, || FileTreeState::detached(FileTree::new()));
        (id, rx)
    }

    fn error(message: &str) -> ServerEvent {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    #[test]
    fn broadcast_excludes_sender() {
        let (mut sessions, mut rooms) = (SessionRegistry::default(), RoomRegistry::default());
        let room_id = ProjectId::generate();
        let (a, mut rx_a) = joined(&mut sessions, &mut rooms, &room_id, "a");
        let (_b, mut rx_b) = joined(&mut sessions, &mut rooms, &room_id, "b");
        let (_c, mut rx_c) = joined(&mut sessions, &mut rooms, &room_id, "c");

        let room = rooms.get(&room_id).unwrap();
        assert_eq!(room.broadcast(&sessions, &error("x"), Delivery::ExceptSender(a)), 2);

        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), error("x"));
        assert_eq!(rx_c.try_recv().unwrap(), error("x"));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn broadcast_stays_in_room() {
        let (mut sessions, mut rooms) = (SessionRegistry::default(), RoomRegistry::default());
        let (p1, p2) = (ProjectId::generate(), ProjectId::generate());
        let (_a, mut rx_a) = joined(&mut sessions, &mut rooms, &p1, "a");
        let (_b, mut rx_b) = joined(&mut sessions, &mut rooms, &p2, "b");

        rooms.get(&p1).unwrap().broadcast(&sessions, &error("x"), Delivery::Everyone);

        assert_eq!(rx_a.try_recv().unwrap(), error("x"));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn closed_member_is_skipped() {
        let (mut sessions, mut rooms) = (SessionRegistry::default(), RoomRegistry::default());
        let room_id = ProjectId::generate();
        let (_a, rx_a) = joined(&mut sessions, &mut rooms, &room_id, "a");
        let (_b, mut rx_b) = joined(&mut sessions, &mut rooms, &room_id, "b");
        drop(rx_a);

        let room = rooms.get(&room_id).unwrap();
        assert_eq!(room.broadcast(&sessions, &error("x"), Delivery::Everyone), 1);
        assert_eq!(rx_b.try_recv().unwrap(), error("x"));
    }

    #[test]
    fn room_dropped_with_last_member() {
        let (mut sessions, mut rooms) = (SessionRegistry::default(), RoomRegistry::default());
        let room_id = ProjectId::generate();
        let (a, _rx_a) = joined(&mut sessions, &mut rooms, &room_id, "a");
        let (b, _rx_b) = joined(&mut sessions, &mut rooms, &room_id, "b");

        assert!(rooms.leave(&room_id, a).is_none());
        assert_eq!(rooms.get(&room_id).unwrap().members(), &[b]);
        assert!(rooms.leave(&room_id, b).is_some());
        assert!(rooms.is_empty());
    }

    #[test]
    fn drain_empties_registry() {
        let (mut sessions, mut rooms) = (SessionRegistry::default(), RoomRegistry::default());
        let (p1, p2) = (ProjectId::generate(), ProjectId::generate());
        joined(&mut sessions, &mut rooms, &p1, "a");
        joined(&mut sessions, &mut rooms, &p2, "b");

        let mut drained: Vec<ProjectId> = rooms.drain().map(|room| room.id).collect();
        drained.sort();
        let mut expected = vec![p1, p2];
        expected.sort();
        assert_eq!(drained, expected);
        assert!(rooms.is_empty());
    }
}
