//! Контракт внешнего медиа-движка: ICE, DTLS/SRTP, кодеки и доставка
//! data-channel сообщений живут за этими трейтами.

use crate::error::Result;
use crate::peer::negotiator::Event;
use crate::peer::types::{
    ConnectivityState, DataChannelState, IceCandidate, LinkId, MediaTrack, RemoteTrack,
    SessionDescription,
};
use crate::session::Input;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::trace;

/// Фабрика соединений
#[async_trait]
pub trait Engine: Send + Sync {
    /// Создаёт соединение для `link`; все его асинхронные события идут в `events`
    async fn create_peer(&self, link: LinkId, events: EngineEvents) -> Result<Box<dyn EnginePeer>>;
}

/// Одно соединение движка. Вызовы приходят строго последовательно.
#[async_trait]
pub trait EnginePeer: Send + Sync {
    /// `ice_restart` требует новых ICE-учётных данных в offer'е
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;
    /// Откатывает неподтверждённый локальный offer
    async fn rollback(&self) -> Result<()>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;
    async fn add_track(&self, track: MediaTrack) -> Result<()>;
    async fn remove_track(&self, track_id: &str) -> Result<()>;
    async fn create_data_channel(&self, label: &str) -> Result<()>;
    async fn send(&self, label: &str, data: Bytes) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// События, которые движок порождает сам
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    LocalCandidate(IceCandidate),
    ConnectivityChanged(ConnectivityState),
    RemoteTrackAdded(RemoteTrack),
    RemoteTrackRemoved(String),
    /// Канал открыт удалённой стороной
    DataChannelCreated(String),
    DataChannelStateChanged {
        label: String,
        state: DataChannelState,
    },
    DataChannelMessage {
        label: String,
        data: Bytes,
    },
}

/// Приёмник событий движка, привязанный к конкретному PeerLink.
/// После завершения сессии события молча отбрасываются.
#[derive(Clone)]
pub struct EngineEvents {
    link: LinkId,
    queue: mpsc::WeakUnboundedSender<Input>,
}

impl EngineEvents {
    pub(crate) fn new(link: LinkId, queue: mpsc::WeakUnboundedSender<Input>) -> Self {
        Self { link, queue }
    }

    pub fn link(&self) -> LinkId {
        self.link
    }

    pub fn emit(&self, event: EngineEvent) {
        let Some(queue) = self.queue.upgrade() else {
            trace!("{}: session gone, dropping {event:?}", self.link);
            return;
        };
        let _ = queue.send(Input::Event(Event::Engine {
            link: self.link,
            event,
        }));
    }
}
