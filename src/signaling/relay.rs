//! Relay комнат в памяти процесса: те же правила, что у сигнального
//! сервера (не больше двух участников, пересылка без roomId), но без сети.
//! Используется в тестах и для звонков внутри одного процесса.

use super::{SignalingEvent, SignalingLink, SignalingMessage};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

pub const USER_ALREADY_IN_ROOM: &str = "User is already in this room";
pub const ROOM_IS_FULL: &str = "Room is full";
pub const ROOM_NOT_FOUND: &str = "Room not found";

const MAX_PARTICIPANTS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParticipantId(pub u64);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "participant-{}", self.0)
    }
}

struct Room {
    id: String,
    participants: Vec<ParticipantId>,
}

#[derive(Default)]
struct RelayState {
    next_id: u64,
    participants: HashMap<ParticipantId, mpsc::UnboundedSender<SignalingEvent>>,
    rooms: Vec<Room>,
}

impl RelayState {
    fn deliver(&self, to: ParticipantId, msg: SignalingMessage) {
        if let Some(tx) = self.participants.get(&to) {
            let _ = tx.send(SignalingEvent::Message(msg));
        }
    }

    fn notice(&self, to: ParticipantId, message: &str) {
        debug!("{to}: notice '{message}'");
        self.deliver(
            to,
            SignalingMessage::Notice {
                message: message.to_owned(),
            },
        );
    }

    fn others(&self, room_id: &str, sender: ParticipantId) -> Option<Vec<ParticipantId>> {
        self.rooms.iter().find(|r| r.id == room_id).map(|room| {
            room.participants
                .iter()
                .copied()
                .filter(|p| *p != sender)
                .collect()
        })
    }

    fn join(&mut self, id: ParticipantId, room_id: String) {
        let Some(room) = self.rooms.iter_mut().find(|r| r.id == room_id) else {
            info!("{id}: created room {room_id}");
            self.rooms.push(Room {
                id: room_id,
                participants: vec![id],
            });
            return;
        };

        let full = room.participants.len() >= MAX_PARTICIPANTS;
        let already_in = room.participants.first() == Some(&id);
        if !full && !already_in {
            room.participants.push(id);
        }

        if full {
            self.notice(id, ROOM_IS_FULL);
            return;
        }
        if already_in {
            self.notice(id, USER_ALREADY_IN_ROOM);
            return;
        }
        info!("{id}: joined room {room_id}");
        if let Some(others) = self.others(&room_id, id) {
            for other in others {
                self.deliver(other, SignalingMessage::NewUserJoined);
            }
        }
    }

    fn remove_from_rooms(&mut self, id: ParticipantId) {
        for room in self.rooms.iter_mut() {
            room.participants.retain(|p| *p != id);
        }
        self.rooms.retain(|r| !r.participants.is_empty());
    }
}

/// Дешёвый клон разделяет одно состояние
#[derive(Clone, Default)]
pub struct Relay {
    state: Arc<Mutex<RelayState>>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Новый участник. Его канал живёт, пока клиент держит `outbound`
    /// или пока relay не отключит его сам.
    pub async fn connect(&self) -> (ParticipantId, SignalingLink) {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<SignalingMessage>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let _ = in_tx.send(SignalingEvent::Connected);

        let id = {
            let mut state = self.state.lock().await;
            state.next_id += 1;
            let id = ParticipantId(state.next_id);
            state.participants.insert(id, in_tx);
            id
        };
        debug!("{id}: connected");

        let relay = self.clone();
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                relay.handle(id, msg).await;
            }
            relay.disconnect(id).await;
        });

        (
            id,
            SignalingLink {
                outbound: out_tx,
                inbound: in_rx,
            },
        )
    }

    /// Обрывает соединение участника, как при падении сокета
    pub async fn disconnect(&self, id: ParticipantId) {
        let mut state = self.state.lock().await;
        state.remove_from_rooms(id);
        if let Some(tx) = state.participants.remove(&id) {
            info!("{id}: disconnected");
            let _ = tx.send(SignalingEvent::Disconnected);
        }
    }

    /// Сколько участников сейчас в комнате
    pub async fn room_size(&self, room_id: &str) -> usize {
        let state = self.state.lock().await;
        state
            .rooms
            .iter()
            .find(|r| r.id == room_id)
            .map_or(0, |r| r.participants.len())
    }

    async fn handle(&self, id: ParticipantId, msg: SignalingMessage) {
        let mut state = self.state.lock().await;
        if !state.participants.contains_key(&id) {
            debug!("{id}: message after disconnect dropped");
            return;
        }

        match msg {
            SignalingMessage::JoinRoom { room_id } => state.join(id, room_id),
            SignalingMessage::LeaveRoom { room_id } => {
                if state.rooms.iter().any(|r| r.id == room_id) {
                    info!("{id}: left room {room_id}");
                    state.remove_from_rooms(id);
                } else {
                    state.notice(id, ROOM_NOT_FOUND);
                }
            }
            SignalingMessage::Offer { .. }
            | SignalingMessage::Answer { .. }
            | SignalingMessage::IceCandidate { .. } => {
                let recipients = msg.room_id().and_then(|room| state.others(room, id));
                let Some(recipients) = recipients else {
                    state.notice(id, ROOM_NOT_FOUND);
                    return;
                };
                let forwarded = msg.without_room();
                for to in recipients {
                    state.deliver(to, forwarded.clone());
                }
            }
            SignalingMessage::NewUserJoined | SignalingMessage::Notice { .. } => {
                debug!("{id}: ignoring relay-bound '{}'", msg.event_name());
            }
        }
    }
}
