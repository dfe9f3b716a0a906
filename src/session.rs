//! Сессия одной комнаты: одна задача tokio и одна очередь входов.
//! Сигнализация, ответы адаптера, события движка и команды пользователя
//! попадают в очередь и применяются к `Negotiator` строго по порядку.

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::peer::adapter::DescriptionAdapter;
use crate::peer::engine::Engine;
use crate::peer::negotiator::{Action, Event, Negotiator};
use crate::peer::state::SessionSnapshot;
use crate::peer::types::{MediaTrack, SessionEvent};
use crate::signaling::{SignalingEvent, SignalingLink, SignalingMessage};
use crate::utils::random_id;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

pub type Reply<T> = oneshot::Sender<Result<T>>;

/// Команды от `SessionHandle`
pub enum Command {
    SetLocalTracks(Vec<MediaTrack>, Reply<()>),
    AddLocalTrack(MediaTrack, Reply<()>),
    RemoveLocalTrack(String, Reply<()>),
    OpenDataChannel(String, Reply<()>),
    SendData {
        label: String,
        data: Bytes,
        reply: Reply<()>,
    },
    Renegotiate(Reply<()>),
    RestartIce(Reply<()>),
    Snapshot(Reply<SessionSnapshot>),
    Leave(Reply<()>),
}

/// Всё, что попадает в очередь сессии
pub enum Input {
    Event(Event),
    Command(Command),
}

pub struct Session {
    id: String,
    negotiator: Negotiator,
    adapter: DescriptionAdapter,
    signaling: mpsc::UnboundedSender<SignalingMessage>,
    signaling_lost: bool,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl Session {
    /// Запускает сессию. Должна вызываться внутри runtime tokio.
    /// Сессия живёт до `leave` или пока жив хотя бы один `SessionHandle`.
    pub fn join(
        config: SessionConfig,
        signaling: SignalingLink,
        engine: Arc<dyn Engine>,
    ) -> Result<(SessionHandle, mpsc::UnboundedReceiver<SessionEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let SignalingLink { outbound, inbound } = signaling;

        // внутренние источники держат только weak-ссылки на очередь
        tokio::spawn(forward_signaling(inbound, tx.downgrade()));

        let id = random_id();
        info!("Starting session {id} for room {}", config.room_id);
        let session = Session {
            id,
            negotiator: Negotiator::new(config.room_id.clone()),
            adapter: DescriptionAdapter::new(engine, config.preferred_codecs, tx.downgrade()),
            signaling: outbound,
            signaling_lost: false,
            events: events_tx,
        };
        tokio::spawn(session.run(rx));

        Ok((SessionHandle { tx }, events_rx))
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Input>) {
        while let Some(input) = rx.recv().await {
            match input {
                Input::Event(event) => {
                    if let Err(e) = self.negotiator.handle_event(event) {
                        warn!("Rejected inbound message: {e}");
                    }
                }
                Input::Command(command) => self.execute(command),
            }
            self.flush();
            if self.negotiator.is_finished() {
                break;
            }
        }

        if !self.negotiator.is_finished() {
            debug!("Session {}: all handles dropped, leaving", self.id);
            self.negotiator.leave();
            self.flush();
        }
        info!("Session {} finished", self.id);
    }

    fn execute(&mut self, command: Command) {
        let negotiator = &mut self.negotiator;
        match command {
            Command::SetLocalTracks(tracks, reply) => {
                let _ = reply.send(negotiator.set_local_tracks(tracks));
            }
            Command::AddLocalTrack(track, reply) => {
                let next = negotiator.local_tracks().with(track);
                let _ = reply.send(negotiator.set_local_tracks(next.iter().cloned()));
            }
            Command::RemoveLocalTrack(track_id, reply) => {
                let next = negotiator.local_tracks().without(&track_id);
                let _ = reply.send(negotiator.set_local_tracks(next.iter().cloned()));
            }
            Command::OpenDataChannel(label, reply) => {
                let _ = reply.send(negotiator.open_data_channel(&label));
            }
            Command::SendData { label, data, reply } => {
                let _ = reply.send(negotiator.send_data(&label, data));
            }
            Command::Renegotiate(reply) => {
                let _ = reply.send(negotiator.request_renegotiation());
            }
            Command::RestartIce(reply) => {
                let _ = reply.send(negotiator.restart_ice());
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(Ok(negotiator.snapshot()));
            }
            Command::Leave(reply) => {
                negotiator.leave();
                // leave room должен уйти до ответа вызывающему
                self.flush();
                let _ = reply.send(Ok(()));
            }
        }
    }

    /// Исполняет накопленные действия и отдаёт события наверх
    fn flush(&mut self) {
        while let Some(action) = self.negotiator.poll_action() {
            match action {
                Action::Signal(msg) => {
                    if self.signaling_lost {
                        debug!("Signaling lost, dropping '{}'", msg.event_name());
                        continue;
                    }
                    if self.signaling.send(msg).is_err() {
                        warn!("Signaling transport is gone");
                        self.signaling_lost = true;
                        let _ = self.negotiator.handle_event(Event::SignalingDisconnected);
                    }
                }
                Action::Peer { link, op } => self.adapter.submit(link, op),
            }
        }
        while let Some(event) = self.negotiator.poll_event() {
            let _ = self.events.send(event);
        }
    }
}

/// Переводит события транспорта в события сессии
async fn forward_signaling(
    mut inbound: mpsc::UnboundedReceiver<SignalingEvent>,
    queue: mpsc::WeakUnboundedSender<Input>,
) {
    let post = |event: Event| match queue.upgrade() {
        Some(queue) => queue.send(Input::Event(event)).is_ok(),
        None => false,
    };

    while let Some(event) = inbound.recv().await {
        let event = match event {
            SignalingEvent::Connected => Event::SignalingConnected,
            SignalingEvent::Message(msg) => Event::Signal(msg),
            SignalingEvent::Malformed(reason) => {
                warn!("Dropping malformed signaling message: {reason}");
                continue;
            }
            SignalingEvent::Disconnected => break,
        };
        if !post(event) {
            return;
        }
    }
    // закрытый канал тоже считается обрывом
    post(Event::SignalingDisconnected);
}

/// Дескриптор сессии; клонируется свободно
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Input>,
}

impl SessionHandle {
    async fn call<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Input::Command(command(reply)))
            .map_err(|_| Error::SessionGone)?;
        rx.await.map_err(|_| Error::SessionGone)?
    }

    /// Заменяет весь набор локальных треков
    pub async fn set_local_tracks(&self, tracks: Vec<MediaTrack>) -> Result<()> {
        self.call(|reply| Command::SetLocalTracks(tracks, reply))
            .await
    }

    pub async fn add_local_track(&self, track: MediaTrack) -> Result<()> {
        self.call(|reply| Command::AddLocalTrack(track, reply)).await
    }

    /// Например, когда система остановила захват экрана
    pub async fn remove_local_track(&self, track_id: &str) -> Result<()> {
        let track_id = track_id.to_owned();
        self.call(|reply| Command::RemoveLocalTrack(track_id, reply))
            .await
    }

    pub async fn open_data_channel(&self, label: &str) -> Result<()> {
        let label = label.to_owned();
        self.call(|reply| Command::OpenDataChannel(label, reply))
            .await
    }

    pub async fn send_data(&self, label: &str, data: Bytes) -> Result<()> {
        let label = label.to_owned();
        self.call(|reply| Command::SendData { label, data, reply })
            .await
    }

    pub async fn send_text(&self, label: &str, text: &str) -> Result<()> {
        self.send_data(label, Bytes::copy_from_slice(text.as_bytes()))
            .await
    }

    pub async fn renegotiate(&self) -> Result<()> {
        self.call(Command::Renegotiate).await
    }

    /// Перезапуск ICE на текущем соединении, например после смены сети
    pub async fn restart_ice(&self) -> Result<()> {
        self.call(Command::RestartIce).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        self.call(Command::Snapshot).await
    }

    pub async fn leave(&self) -> Result<()> {
        self.call(Command::Leave).await
    }

    /// Задача сессии ещё принимает команды
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}
