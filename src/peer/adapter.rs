//! Адаптер описаний сессии: выполняет запросы переговорщика на движке
//! строго по порядку и возвращает результаты в очередь сессии.

use crate::error::Result;
use crate::peer::engine::{Engine, EngineEvents, EnginePeer};
use crate::peer::negotiator::Event;
use crate::peer::sdp::prefer_codecs;
use crate::peer::types::{IceCandidate, LinkId, MediaTrack, SessionDescription};
use crate::session::Input;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Номер асинхронного запроса; ответ с чужим номером игнорируется
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpTicket(pub u64);

impl fmt::Display for OpTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Запросы к соединению движка
#[derive(Debug, Clone, PartialEq)]
pub enum PeerOp {
    Open,
    CreateOffer { ticket: OpTicket, ice_restart: bool },
    CreateAnswer(OpTicket),
    ApplyLocal(OpTicket, SessionDescription),
    ApplyRemote(OpTicket, SessionDescription),
    Rollback(OpTicket),
    AddCandidate(IceCandidate),
    AddTrack(MediaTrack),
    RemoveTrack(String),
    CreateDataChannel(String),
    Send { label: String, data: Bytes },
    Close,
}

/// Результат запроса с номером
#[derive(Debug)]
pub enum Completion {
    DescriptionCreated(Result<SessionDescription>),
    LocalApplied(Result<()>),
    RemoteApplied(Result<()>),
    RolledBack(Result<()>),
}

pub struct DescriptionAdapter {
    engine: Arc<dyn Engine>,
    preferred_codecs: Arc<Vec<String>>,
    queue: mpsc::WeakUnboundedSender<Input>,
    worker: Option<(LinkId, mpsc::UnboundedSender<PeerOp>)>,
}

impl DescriptionAdapter {
    pub fn new(
        engine: Arc<dyn Engine>,
        preferred_codecs: Vec<String>,
        queue: mpsc::WeakUnboundedSender<Input>,
    ) -> Self {
        Self {
            engine,
            preferred_codecs: Arc::new(preferred_codecs),
            queue,
            worker: None,
        }
    }

    pub fn submit(&mut self, link: LinkId, op: PeerOp) {
        if op == PeerOp::Open {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(run_worker(
                self.engine.clone(),
                link,
                self.preferred_codecs.clone(),
                rx,
                self.queue.clone(),
            ));
            // старый worker доработает свою очередь и завершится
            self.worker = Some((link, tx));
            return;
        }

        let is_close = op == PeerOp::Close;
        match &self.worker {
            Some((current, tx)) if *current == link => {
                if tx.send(op).is_err() {
                    debug!("{link}: worker already stopped");
                }
                if is_close {
                    self.worker = None;
                }
            }
            _ => debug!("{link}: no active worker, dropping {op:?}"),
        }
    }
}

fn post(queue: &mpsc::WeakUnboundedSender<Input>, event: Event) {
    if let Some(queue) = queue.upgrade() {
        let _ = queue.send(Input::Event(event));
    }
}

fn with_codecs(desc: SessionDescription, codecs: &[String]) -> SessionDescription {
    if codecs.is_empty() {
        return desc;
    }
    SessionDescription {
        sdp: prefer_codecs(&desc.sdp, codecs),
        ..desc
    }
}

async fn run_worker(
    engine: Arc<dyn Engine>,
    link: LinkId,
    codecs: Arc<Vec<String>>,
    mut ops: mpsc::UnboundedReceiver<PeerOp>,
    queue: mpsc::WeakUnboundedSender<Input>,
) {
    info!("{link}: creating peer connection");
    let peer = match engine
        .create_peer(link, EngineEvents::new(link, queue.clone()))
        .await
    {
        Ok(peer) => peer,
        Err(e) => {
            error!("{link}: failed to create peer connection: {e}");
            post(
                &queue,
                Event::PeerFailed {
                    link,
                    reason: e.to_string(),
                },
            );
            return;
        }
    };

    let complete = |ticket: OpTicket, completion: Completion| {
        post(
            &queue,
            Event::Completed {
                link,
                ticket,
                completion,
            },
        )
    };

    while let Some(op) = ops.recv().await {
        match op {
            PeerOp::Open => {}
            PeerOp::CreateOffer {
                ticket,
                ice_restart,
            } => {
                debug!("{link}: creating offer {ticket} (ice restart: {ice_restart})");
                let result = peer
                    .create_offer(ice_restart)
                    .await
                    .map(|d| with_codecs(d, &codecs));
                complete(ticket, Completion::DescriptionCreated(result));
            }
            PeerOp::CreateAnswer(ticket) => {
                debug!("{link}: creating answer {ticket}");
                let result = peer.create_answer().await.map(|d| with_codecs(d, &codecs));
                complete(ticket, Completion::DescriptionCreated(result));
            }
            PeerOp::ApplyLocal(ticket, desc) => {
                debug!("{link}: setting local description ({}) {ticket}", desc.sdp_type);
                let result = peer.set_local_description(desc).await;
                complete(ticket, Completion::LocalApplied(result));
            }
            PeerOp::ApplyRemote(ticket, desc) => {
                debug!("{link}: setting remote description ({}) {ticket}", desc.sdp_type);
                let result = peer.set_remote_description(desc).await;
                complete(ticket, Completion::RemoteApplied(result));
            }
            PeerOp::Rollback(ticket) => {
                debug!("{link}: rolling back local offer {ticket}");
                let result = peer.rollback().await;
                complete(ticket, Completion::RolledBack(result));
            }
            PeerOp::AddCandidate(candidate) => {
                if let Err(e) = peer.add_ice_candidate(candidate).await {
                    warn!("{link}: failed to add ICE candidate: {e}");
                }
            }
            PeerOp::AddTrack(track) => {
                let id = track.id.clone();
                if let Err(e) = peer.add_track(track).await {
                    warn!("{link}: failed to add track '{id}': {e}");
                }
            }
            PeerOp::RemoveTrack(id) => {
                if let Err(e) = peer.remove_track(&id).await {
                    warn!("{link}: failed to remove track '{id}': {e}");
                }
            }
            PeerOp::CreateDataChannel(label) => {
                if let Err(e) = peer.create_data_channel(&label).await {
                    warn!("{link}: failed to create data channel '{label}': {e}");
                }
            }
            PeerOp::Send { label, data } => {
                if let Err(e) = peer.send(&label, data).await {
                    warn!("{link}: send on '{label}' failed: {e}");
                }
            }
            PeerOp::Close => break,
        }
    }

    close_peer(link, peer.as_ref()).await;
}

async fn close_peer(link: LinkId, peer: &dyn EnginePeer) {
    info!("{link}: closing peer connection");
    if let Err(e) = peer.close().await {
        warn!("{link}: close failed: {e}");
    }
}
