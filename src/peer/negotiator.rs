//! Машина состояний переговоров. Ничего не делает сама: принимает события
//! по одному, а наружу отдаёт действия (`poll_action`) и события для
//! вызывающей стороны (`poll_event`). Все переходы идут в одном потоке.

use crate::error::{Error, MisuseError, Result};
use crate::peer::adapter::{Completion, OpTicket, PeerOp};
use crate::peer::engine::EngineEvent;
use crate::peer::ice::CandidateQueue;
use crate::peer::state::{NegotiationState, PeerLink, Role, SessionSnapshot};
use crate::peer::tracks::{LocalMedia, TrackSet};
use crate::peer::types::{
    CloseReason, ConnectivityState, DataChannelState, IceCandidate, LinkId, MediaTrack, SdpType,
    SessionDescription, SessionEvent, SessionStatus,
};
use crate::signaling::SignalingMessage;
use bytes::Bytes;
use std::collections::VecDeque;
use tracing::{debug, error, info, trace, warn};

/// Входы машины состояний
#[derive(Debug)]
pub enum Event {
    SignalingConnected,
    SignalingDisconnected,
    Signal(SignalingMessage),
    /// Ответ адаптера на запрос с номером
    Completed {
        link: LinkId,
        ticket: OpTicket,
        completion: Completion,
    },
    /// Движок не смог создать соединение
    PeerFailed { link: LinkId, reason: String },
    Engine { link: LinkId, event: EngineEvent },
}

/// Выходы машины состояний
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Signal(SignalingMessage),
    Peer { link: LinkId, op: PeerOp },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpKind {
    CreateOffer,
    CreateAnswer,
    ApplyLocal,
    ApplyRemote,
    Rollback,
}

/// Единственный незавершённый запрос к адаптеру
#[derive(Debug, Clone, Copy)]
struct PendingOp {
    ticket: OpTicket,
    kind: OpKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Offerer {
    Local,
    Remote,
}

/// Текущий раунд offer/answer
#[derive(Debug)]
struct Round {
    offerer: Offerer,
    /// локальный offer отправлен, ждём answer
    awaiting_answer: bool,
    /// первый раунд нового PeerLink
    initial: bool,
    /// local description до начала раунда, восстанавливается при откате
    previous_local: Option<SessionDescription>,
    ice_restart: bool,
}

pub struct Negotiator {
    room_id: String,
    role: Role,
    state: NegotiationState,
    link: Option<PeerLink>,
    next_link: u64,
    next_ticket: u64,
    pending: Option<PendingOp>,
    round: Option<Round>,
    media: LocalMedia,
    /// Кандидаты, пришедшие до появления PeerLink
    early_candidates: CandidateQueue,
    /// Удалённый offer, ждущий отката или конца текущего раунда
    stashed_offer: Option<SessionDescription>,
    /// Уступили glare; после Stable нужно предложить свой offer заново
    renegotiate_after_glare: bool,
    /// Следующий локальный offer перезапускает ICE
    ice_restart_requested: bool,
    signaling_connected: bool,
    joined: bool,
    finished: bool,
    actions: VecDeque<Action>,
    events: VecDeque<SessionEvent>,
}

impl Negotiator {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            role: Role::Undetermined,
            state: NegotiationState::Idle,
            link: None,
            next_link: 0,
            next_ticket: 0,
            pending: None,
            round: None,
            media: LocalMedia::default(),
            early_candidates: CandidateQueue::default(),
            stashed_offer: None,
            renegotiate_after_glare: false,
            ice_restart_requested: false,
            signaling_connected: false,
            joined: false,
            finished: false,
            actions: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn local_tracks(&self) -> &TrackSet {
        &self.media.tracks
    }

    /// Сессия завершена через `leave`
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn poll_action(&mut self) -> Option<Action> {
        self.actions.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            room_id: self.room_id.clone(),
            role: self.role,
            state: self.state,
            link: self.link.as_ref().map(|l| l.id),
            local_tracks: self.media.tracks.ids(),
            data_channels: self
                .link
                .as_ref()
                .map(|l| l.channels.snapshot())
                .unwrap_or_default(),
            pending_candidates: self
                .link
                .as_ref()
                .map_or(self.early_candidates.len(), |l| l.pending_candidates.len()),
            signaling_connected: self.signaling_connected,
        }
    }

    /// Применяет одно событие. Ошибка означает отвергнутое входящее
    /// сообщение; состояние при этом не меняется.
    pub fn handle_event(&mut self, event: Event) -> Result<()> {
        if self.finished {
            trace!("Session finished, ignoring {event:?}");
            return Ok(());
        }
        match event {
            Event::SignalingConnected => self.on_signaling_connected(),
            Event::SignalingDisconnected => self.on_signaling_lost(),
            Event::Signal(msg) => return self.on_signal(msg),
            Event::Completed {
                link,
                ticket,
                completion,
            } => self.on_completed(link, ticket, completion),
            Event::PeerFailed { link, reason } => {
                if self.is_current(link) {
                    error!("{link}: peer connection failed: {reason}");
                    self.close_link(CloseReason::NegotiationFailed(reason));
                }
            }
            Event::Engine { link, event } => self.on_engine_event(link, event),
        }
        Ok(())
    }

    /// ========== COMMANDS ==========

    /// Заменяет набор локальных треков
    pub fn set_local_tracks(&mut self, tracks: impl IntoIterator<Item = MediaTrack>) -> Result<()> {
        self.ensure_active()?;
        let next = TrackSet::new(tracks);

        if self.link.is_none() {
            debug!("No peer link, {} track(s) become the baseline", next.len());
            self.media.tracks = next;
            return Ok(());
        }
        if self.round_in_flight() {
            return Err(MisuseError::NegotiationInProgress.into());
        }

        let Some(link) = self.link.as_mut() else {
            return Ok(());
        };
        let delta = link.tracks.diff(&next);
        link.tracks = next.clone();
        let id = link.id;
        self.media.tracks = next;
        if delta.is_empty() {
            return Ok(());
        }

        info!(
            "{id}: local tracks changed (+{} -{}), renegotiating",
            delta.added.len(),
            delta.removed.len()
        );
        for track_id in delta.removed {
            self.push_peer(id, PeerOp::RemoveTrack(track_id));
        }
        for track in delta.added {
            self.push_peer(id, PeerOp::AddTrack(track));
        }
        self.begin_local_round(false);
        Ok(())
    }

    /// Идемпотентно по метке
    pub fn open_data_channel(&mut self, label: &str) -> Result<()> {
        self.ensure_active()?;
        if label.trim().is_empty() {
            return Err(MisuseError::InvalidLabel.into());
        }
        self.media.want_channel(label);

        let Some(link) = self.link.as_ref() else {
            debug!("No peer link, data channel '{label}' will be created with it");
            return Ok(());
        };
        if link.channels.contains(label) {
            return Ok(());
        }
        let id = link.id;
        if self.round_in_flight() {
            debug!("{id}: negotiation in progress, queueing data channel '{label}'");
            self.media.queue_open(label);
            return Ok(());
        }

        self.create_channel(id, label);
        self.begin_local_round(false);
        Ok(())
    }

    pub fn send_data(&mut self, label: &str, data: Bytes) -> Result<()> {
        self.ensure_active()?;
        let Some(link) = self.link.as_ref() else {
            return Err(MisuseError::DataChannelNotOpen(label.to_owned()).into());
        };
        link.channels.check_send(label)?;
        let id = link.id;
        self.push_peer(
            id,
            PeerOp::Send {
                label: label.to_owned(),
                data,
            },
        );
        Ok(())
    }

    /// Явный запрос нового раунда на том же PeerLink
    pub fn request_renegotiation(&mut self) -> Result<()> {
        self.ensure_active()?;
        if self.link.is_none() {
            return Err(MisuseError::NoPeerLink.into());
        }
        if self.round_in_flight() {
            return Err(MisuseError::NegotiationInProgress.into());
        }
        self.begin_local_round(false);
        Ok(())
    }

    /// Новый раунд с перезапуском ICE: offer несёт новые ufrag/pwd
    pub fn restart_ice(&mut self) -> Result<()> {
        self.ensure_active()?;
        if self.link.is_none() {
            return Err(MisuseError::NoPeerLink.into());
        }
        if self.round_in_flight() {
            return Err(MisuseError::NegotiationInProgress.into());
        }
        info!("Restarting ICE on the current link");
        self.ice_restart_requested = true;
        self.begin_local_round(false);
        Ok(())
    }

    /// Выход из комнаты. После этого все команды отвергаются.
    pub fn leave(&mut self) {
        if self.finished {
            return;
        }
        info!("Leaving room {}", self.room_id);
        if self.joined && self.signaling_connected {
            self.actions
                .push_back(Action::Signal(SignalingMessage::LeaveRoom {
                    room_id: self.room_id.clone(),
                }));
        }
        self.close_link(CloseReason::Left);
        self.finished = true;
    }

    /// ========== SIGNALING ==========

    fn on_signaling_connected(&mut self) {
        self.signaling_connected = true;
        self.events
            .push_back(SessionEvent::Status(SessionStatus::Connecting));
        if !self.joined {
            self.joined = true;
            info!("Joining room {}", self.room_id);
            self.actions
                .push_back(Action::Signal(SignalingMessage::JoinRoom {
                    room_id: self.room_id.clone(),
                }));
        }
    }

    fn on_signaling_lost(&mut self) {
        warn!("Signaling channel lost");
        self.signaling_connected = false;
        self.events
            .push_back(SessionEvent::Status(SessionStatus::Disconnected));
        self.close_link(CloseReason::SignalingLost);
    }

    fn on_signal(&mut self, msg: SignalingMessage) -> Result<()> {
        debug!("<- '{}'", msg.event_name());
        match msg {
            SignalingMessage::NewUserJoined => self.on_peer_joined(),
            SignalingMessage::Offer { offer, .. } => return self.on_remote_offer(offer),
            SignalingMessage::Answer { answer, .. } => return self.on_remote_answer(answer),
            SignalingMessage::IceCandidate { candidate, .. } => self.on_remote_candidate(candidate),
            SignalingMessage::Notice { message } => {
                info!("Relay notice: {message}");
                self.events.push_back(SessionEvent::RelayNotice(message));
            }
            SignalingMessage::JoinRoom { .. } | SignalingMessage::LeaveRoom { .. } => {
                debug!("Ignoring server-bound message");
            }
        }
        Ok(())
    }

    fn on_peer_joined(&mut self) {
        if self.link.is_some() {
            info!("Peer joined again, restarting the link");
            self.close_link(CloseReason::PeerRestarted);
        }
        self.role = Role::Initiator;
        let id = self.open_link();
        for label in self.media.channels.clone() {
            self.create_channel(id, &label);
        }
        self.begin_local_round(true);
    }

    fn on_remote_offer(&mut self, offer: SessionDescription) -> Result<()> {
        if self.link.is_none() {
            self.role = Role::Responder;
            self.open_link();
            // каналы инициатора придут сами; недостающие создадим после Stable
            for label in self.media.channels.clone() {
                self.media.queue_open(&label);
            }
            self.begin_remote_round(offer, true);
            return Ok(());
        }

        if self.stashed_offer.is_some() {
            warn!("Remote offer while another one is waiting");
            return Err(MisuseError::UnexpectedOffer.into());
        }
        let answer_in_flight = self.pending.map(|p| p.kind) == Some(OpKind::ApplyRemote);
        match self.round.as_ref().map(|r| r.offerer) {
            None => self.begin_remote_round(offer, false),
            Some(Offerer::Remote) => {
                warn!("Remote offer while answering the previous one");
                return Err(MisuseError::UnexpectedOffer.into());
            }
            Some(Offerer::Local) if answer_in_flight => {
                // собеседник уже ответил и начал новый раунд
                debug!("Deferring remote offer until the answer is applied");
                self.stashed_offer = Some(offer);
            }
            Some(Offerer::Local) => self.resolve_glare(offer),
        }
        Ok(())
    }

    /// Встречные offer'ы: инициатор всегда выигрывает
    fn resolve_glare(&mut self, offer: SessionDescription) {
        if self.role == Role::Initiator {
            info!("Glare: keeping local offer, ignoring the remote one");
            return;
        }

        info!("Glare: yielding to the initiator's offer");
        self.renegotiate_after_glare = true;
        if self.round.as_ref().is_some_and(|r| r.ice_restart) {
            self.ice_restart_requested = true;
        }
        if self.pending.map(|p| p.kind) == Some(OpKind::CreateOffer) {
            // offer ещё не создан, откатывать нечего
            self.pending = None;
            self.begin_remote_round(offer, false);
            return;
        }

        let Some(id) = self.link.as_ref().map(|l| l.id) else {
            return;
        };
        let ticket = self.next_ticket();
        self.pending = Some(PendingOp {
            ticket,
            kind: OpKind::Rollback,
        });
        self.stashed_offer = Some(offer);
        self.push_peer(id, PeerOp::Rollback(ticket));
    }

    fn on_remote_answer(&mut self, answer: SessionDescription) -> Result<()> {
        let expected = matches!(
            &self.round,
            Some(Round {
                offerer: Offerer::Local,
                awaiting_answer: true,
                ..
            })
        ) && self.pending.is_none();
        if !expected {
            warn!("Unexpected answer in state {}", self.state);
            return Err(MisuseError::UnexpectedAnswer.into());
        }

        let ticket = self.next_ticket();
        let Some(link) = self.link.as_mut() else {
            return Err(MisuseError::NoPeerLink.into());
        };
        link.remote_description = Some(answer.clone());
        let id = link.id;
        if let Some(round) = self.round.as_mut() {
            round.awaiting_answer = false;
        }
        self.pending = Some(PendingOp {
            ticket,
            kind: OpKind::ApplyRemote,
        });
        self.push_peer(id, PeerOp::ApplyRemote(ticket, answer));
        Ok(())
    }

    fn on_remote_candidate(&mut self, candidate: IceCandidate) {
        let Some(link) = self.link.as_mut() else {
            if self.state == NegotiationState::Closed {
                debug!("Link closed, dropping remote candidate");
            } else {
                debug!("No peer link yet, keeping remote candidate");
                self.early_candidates.push(candidate);
            }
            return;
        };
        link.pending_candidates.push(candidate);
        if link.remote_ready {
            self.drain_candidates();
        }
    }

    /// ========== ADAPTER COMPLETIONS ==========

    fn on_completed(&mut self, link: LinkId, ticket: OpTicket, completion: Completion) {
        let current = self
            .pending
            .filter(|p| p.ticket == ticket && self.is_current(link));
        let Some(pending) = current else {
            debug!("{link}: ignoring stale completion {ticket}");
            return;
        };
        self.pending = None;

        match (pending.kind, completion) {
            (
                OpKind::CreateOffer | OpKind::CreateAnswer,
                Completion::DescriptionCreated(Ok(desc)),
            ) => self.apply_local(desc),
            (OpKind::ApplyLocal, Completion::LocalApplied(Ok(()))) => self.on_local_applied(),
            (OpKind::ApplyRemote, Completion::RemoteApplied(Ok(()))) => self.on_remote_applied(),
            (OpKind::Rollback, Completion::RolledBack(Ok(()))) => self.on_rolled_back(),
            (kind, completion) => {
                let reason = match completion {
                    Completion::DescriptionCreated(Err(e))
                    | Completion::LocalApplied(Err(e))
                    | Completion::RemoteApplied(Err(e))
                    | Completion::RolledBack(Err(e)) => e.to_string(),
                    other => format!("unexpected completion {other:?}"),
                };
                error!("{link}: {kind:?} failed: {reason}");
                self.close_link(CloseReason::NegotiationFailed(reason));
            }
        }
    }

    fn apply_local(&mut self, desc: SessionDescription) {
        let ticket = self.next_ticket();
        let Some(link) = self.link.as_mut() else {
            return;
        };
        link.local_description = Some(desc.clone());
        let id = link.id;
        self.pending = Some(PendingOp {
            ticket,
            kind: OpKind::ApplyLocal,
        });
        self.push_peer(id, PeerOp::ApplyLocal(ticket, desc));
    }

    fn on_local_applied(&mut self) {
        let Some(desc) = self.link.as_ref().and_then(|l| l.local_description.clone()) else {
            return;
        };
        let room_id = Some(self.room_id.clone());
        match desc.sdp_type {
            SdpType::Offer => {
                info!("-> 'offer'");
                self.actions
                    .push_back(Action::Signal(SignalingMessage::Offer { room_id, offer: desc }));
                let initial = match self.round.as_mut() {
                    Some(round) => {
                        round.awaiting_answer = true;
                        round.initial
                    }
                    None => false,
                };
                if initial {
                    self.set_state(NegotiationState::AwaitingRemoteAnswer);
                }
            }
            SdpType::Answer => {
                info!("-> 'answer'");
                self.actions.push_back(Action::Signal(SignalingMessage::Answer {
                    room_id,
                    answer: desc,
                }));
                self.finish_round();
            }
        }
    }

    fn on_remote_applied(&mut self) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        link.remote_ready = true;
        let remote_type = link.remote_description.as_ref().map(|d| d.sdp_type);
        let id = link.id;
        self.drain_candidates();

        match remote_type {
            Some(SdpType::Offer) => {
                let ticket = self.next_ticket();
                self.pending = Some(PendingOp {
                    ticket,
                    kind: OpKind::CreateAnswer,
                });
                self.push_peer(id, PeerOp::CreateAnswer(ticket));
            }
            Some(SdpType::Answer) => self.finish_round(),
            None => {}
        }
    }

    fn on_rolled_back(&mut self) {
        let Some(offer) = self.stashed_offer.take() else {
            return;
        };
        let previous = self.round.take().and_then(|r| r.previous_local);
        if let Some(link) = self.link.as_mut() {
            link.local_description = previous;
        }
        self.begin_remote_round(offer, false);
    }

    /// ========== ENGINE EVENTS ==========

    fn on_engine_event(&mut self, link: LinkId, event: EngineEvent) {
        if !self.is_current(link) {
            trace!("{link}: ignoring event from a closed link: {event:?}");
            return;
        }
        match event {
            EngineEvent::LocalCandidate(candidate) => {
                self.actions
                    .push_back(Action::Signal(SignalingMessage::IceCandidate {
                        room_id: Some(self.room_id.clone()),
                        candidate,
                    }));
            }
            EngineEvent::ConnectivityChanged(state) => {
                info!("{link}: connectivity {state:?}");
                match state {
                    ConnectivityState::Connecting => {}
                    ConnectivityState::Connected => self
                        .events
                        .push_back(SessionEvent::Status(SessionStatus::Connected)),
                    ConnectivityState::Disconnected | ConnectivityState::Failed => {
                        self.close_link(CloseReason::Connectivity(state))
                    }
                }
            }
            EngineEvent::RemoteTrackAdded(track) => {
                info!("{link}: remote track '{}' ({:?})", track.id, track.kind);
                self.events.push_back(SessionEvent::RemoteTrackAdded(track));
            }
            EngineEvent::RemoteTrackRemoved(track_id) => {
                self.events
                    .push_back(SessionEvent::RemoteTrackRemoved { track_id });
            }
            EngineEvent::DataChannelCreated(label) => {
                self.media.queued_opens.retain(|l| *l != label);
                self.adopt_channel(&label);
            }
            EngineEvent::DataChannelStateChanged { label, state } => {
                let changed = self
                    .link
                    .as_mut()
                    .is_some_and(|l| l.channels.update(&label, state));
                if changed {
                    self.events
                        .push_back(SessionEvent::DataChannelStateChanged { label, state });
                }
            }
            EngineEvent::DataChannelMessage { label, data } => {
                self.events
                    .push_back(SessionEvent::DataChannelMessage { label, data });
            }
        }
    }

    /// ========== HELPERS ==========

    fn open_link(&mut self) -> LinkId {
        self.next_link += 1;
        let id = LinkId(self.next_link);
        let mut link = PeerLink::new(id, self.media.tracks.clone());
        link.pending_candidates.append(&mut self.early_candidates);
        info!("{id}: opening peer link as {}", self.role);

        self.push_peer(id, PeerOp::Open);
        for track in link.tracks.iter() {
            self.push_peer(id, PeerOp::AddTrack(track.clone()));
        }
        self.link = Some(link);
        id
    }

    fn begin_local_round(&mut self, initial: bool) {
        let ticket = self.next_ticket();
        let Some(link) = self.link.as_mut() else {
            return;
        };
        link.remote_ready = false;
        let id = link.id;
        let ice_restart = std::mem::take(&mut self.ice_restart_requested);
        self.round = Some(Round {
            offerer: Offerer::Local,
            awaiting_answer: false,
            initial,
            previous_local: link.local_description.clone(),
            ice_restart,
        });
        self.pending = Some(PendingOp {
            ticket,
            kind: OpKind::CreateOffer,
        });
        self.push_peer(id, PeerOp::CreateOffer { ticket, ice_restart });
        self.set_state(if initial {
            NegotiationState::AwaitingLocalDescription
        } else {
            NegotiationState::Renegotiating
        });
    }

    fn begin_remote_round(&mut self, offer: SessionDescription, initial: bool) {
        let ticket = self.next_ticket();
        let Some(link) = self.link.as_mut() else {
            return;
        };
        link.remote_ready = false;
        link.remote_description = Some(offer.clone());
        let id = link.id;
        self.round = Some(Round {
            offerer: Offerer::Remote,
            awaiting_answer: false,
            initial,
            previous_local: link.local_description.clone(),
            ice_restart: false,
        });
        self.pending = Some(PendingOp {
            ticket,
            kind: OpKind::ApplyRemote,
        });
        self.push_peer(id, PeerOp::ApplyRemote(ticket, offer));
        self.set_state(if initial {
            NegotiationState::AwaitingLocalDescription
        } else {
            NegotiationState::Renegotiating
        });
    }

    fn finish_round(&mut self) {
        self.round = None;
        self.set_state(NegotiationState::Stable);

        if let Some(offer) = self.stashed_offer.take() {
            self.begin_remote_round(offer, false);
            return;
        }
        let Some(id) = self.link.as_ref().map(|l| l.id) else {
            return;
        };

        let mut renegotiate = std::mem::take(&mut self.renegotiate_after_glare);
        while let Some(label) = self.media.queued_opens.pop_front() {
            renegotiate |= self.create_channel(id, &label);
        }
        if renegotiate {
            self.begin_local_round(false);
        }
    }

    fn drain_candidates(&mut self) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        let id = link.id;
        let drained = link.pending_candidates.drain();
        if !drained.is_empty() {
            debug!("{id}: applying {} queued candidate(s)", drained.len());
        }
        for candidate in drained {
            self.push_peer(id, PeerOp::AddCandidate(candidate));
        }
    }

    /// Создаёт канал на нашей стороне; false если метка уже известна
    fn create_channel(&mut self, id: LinkId, label: &str) -> bool {
        let created = self
            .link
            .as_mut()
            .is_some_and(|l| l.channels.insert_connecting(label));
        if created {
            self.push_peer(id, PeerOp::CreateDataChannel(label.to_owned()));
            self.events
                .push_back(SessionEvent::DataChannelStateChanged {
                    label: label.to_owned(),
                    state: DataChannelState::Connecting,
                });
        }
        created
    }

    /// Регистрирует канал, который создаст удалённая сторона
    fn adopt_channel(&mut self, label: &str) {
        let adopted = self
            .link
            .as_mut()
            .is_some_and(|l| l.channels.insert_connecting(label));
        if adopted {
            self.events
                .push_back(SessionEvent::DataChannelStateChanged {
                    label: label.to_owned(),
                    state: DataChannelState::Connecting,
                });
        }
    }

    fn close_link(&mut self, reason: CloseReason) {
        if self.link.is_none() && self.state == NegotiationState::Closed {
            return;
        }
        if let Some(mut link) = self.link.take() {
            info!("{}: closing peer link ({reason:?})", link.id);
            self.push_peer(link.id, PeerOp::Close);
            for label in link.channels.close_all() {
                self.events
                    .push_back(SessionEvent::DataChannelStateChanged {
                        label,
                        state: DataChannelState::Closed,
                    });
            }
        }

        // незавершённые запросы станут устаревшими
        self.pending = None;
        self.round = None;
        self.stashed_offer = None;
        self.renegotiate_after_glare = false;
        self.ice_restart_requested = false;
        self.early_candidates.clear();
        self.media.queued_opens.clear();
        self.role = Role::Undetermined;

        self.set_state(NegotiationState::Closed);
        self.events
            .push_back(SessionEvent::Status(SessionStatus::Closed));
        self.events.push_back(SessionEvent::Closed { reason });
    }

    fn set_state(&mut self, state: NegotiationState) {
        if self.state == state {
            return;
        }
        info!("Negotiation state: {} -> {} ({})", self.state, state, self.role);
        self.state = state;
        self.events.push_back(SessionEvent::NegotiationStateChanged {
            state,
            role: self.role,
        });
    }

    fn push_peer(&mut self, link: LinkId, op: PeerOp) {
        self.actions.push_back(Action::Peer { link, op });
    }

    fn next_ticket(&mut self) -> OpTicket {
        self.next_ticket += 1;
        OpTicket(self.next_ticket)
    }

    fn is_current(&self, link: LinkId) -> bool {
        self.link.as_ref().is_some_and(|l| l.id == link)
    }

    fn round_in_flight(&self) -> bool {
        self.round.is_some() || self.pending.is_some()
    }

    fn ensure_active(&self) -> Result<()> {
        if self.finished {
            return Err(Error::Misuse(MisuseError::SessionClosed));
        }
        Ok(())
    }
}
