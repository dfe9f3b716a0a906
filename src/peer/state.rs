use crate::peer::data_channel::DataChannels;
use crate::peer::ice::CandidateQueue;
use crate::peer::tracks::TrackSet;
use crate::peer::types::{LinkId, SessionDescription};
use std::fmt;

/// ========== STATES ==========

/// Состояние переговоров
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    AwaitingLocalDescription,
    AwaitingRemoteAnswer,
    Stable,
    Renegotiating,
    Closed,
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Роль локальной стороны в текущем PeerLink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Undetermined,
    /// Был в комнате первым, делает первый offer; выигрывает glare
    Initiator,
    Responder,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// ========== PEER LINK ==========

/// Соединение с единственным собеседником. Переиспользуется между раундами
/// переговоров и пересоздаётся только после закрытия.
#[derive(Debug)]
pub struct PeerLink {
    pub id: LinkId,
    pub local_description: Option<SessionDescription>,
    pub remote_description: Option<SessionDescription>,
    /// Кандидаты, полученные до установки remote description
    pub pending_candidates: CandidateQueue,
    /// remote description текущего раунда принят
    pub remote_ready: bool,
    /// Треки, уже переданные движку
    pub tracks: TrackSet,
    pub channels: DataChannels,
}

impl PeerLink {
    pub fn new(id: LinkId, tracks: TrackSet) -> Self {
        Self {
            id,
            local_description: None,
            remote_description: None,
            pending_candidates: CandidateQueue::default(),
            remote_ready: false,
            tracks,
            channels: DataChannels::default(),
        }
    }
}

/// Снимок состояния сессии для вызывающей стороны
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub room_id: String,
    pub role: Role,
    pub state: NegotiationState,
    pub link: Option<LinkId>,
    pub local_tracks: Vec<String>,
    pub data_channels: Vec<(String, crate::peer::types::DataChannelState)>,
    pub pending_candidates: usize,
    pub signaling_connected: bool,
}
