//! Движок-заглушка для сценариев из двух участников.
//!
//! SDP здесь условный: `a=track:<id> <kind>` и `a=channel:<label>`.
//! Пара движков из [`MockEngine::pair`] доставляет друг другу сообщения
//! data-channel, всё остальное идёт через сигнализацию как обычно.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use ssc_call::peer::{
    ConnectivityState, DataChannelState, Engine, EngineEvent, EngineEvents, EnginePeer,
    IceCandidate, LinkId, MediaTrack, NegotiationState, RemoteTrack, SdpType, SessionDescription,
    TrackKind,
};
use ssc_call::signaling::relay::Relay;
use ssc_call::{Result, SessionEvent, SessionHandle};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Open,
    CreateOffer,
    IceRestart,
    CreateAnswer,
    SetLocal(SdpType),
    SetRemote(SdpType),
    Rollback,
    AddCandidate(String),
    AddTrack(String),
    RemoveTrack(String),
    CreateDataChannel(String),
    Send(String, Bytes),
    Close,
}

type Network = Arc<Mutex<HashMap<&'static str, EngineEvents>>>;

pub struct MockEngine {
    name: &'static str,
    peer_name: &'static str,
    network: Network,
    calls: Arc<Mutex<Vec<(LinkId, Call)>>>,
}

impl MockEngine {
    pub fn pair() -> (Arc<MockEngine>, Arc<MockEngine>) {
        let network = Network::default();
        let engine = |name, peer_name| {
            Arc::new(MockEngine {
                name,
                peer_name,
                network: network.clone(),
                calls: Arc::default(),
            })
        };
        (engine("a", "b"), engine("b", "a"))
    }

    pub fn single() -> Arc<MockEngine> {
        Self::pair().0
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn candidates_applied(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::AddCandidate(candidate) => Some(candidate),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Engine for MockEngine {
    async fn create_peer(&self, link: LinkId, events: EngineEvents) -> Result<Box<dyn EnginePeer>> {
        self.network
            .lock()
            .unwrap()
            .insert(self.name, events.clone());
        self.calls.lock().unwrap().push((link, Call::Open));
        Ok(Box::new(MockPeer {
            link,
            name: self.name,
            peer_name: self.peer_name,
            network: self.network.clone(),
            calls: self.calls.clone(),
            events,
            state: Mutex::default(),
        }))
    }
}

#[derive(Default)]
struct PeerState {
    version: u32,
    tracks: Vec<MediaTrack>,
    channels: Vec<String>,
    remote_tracks: Vec<String>,
    opened: Vec<String>,
    has_local: bool,
    has_remote: bool,
    candidates_sent: bool,
    connected: bool,
}

struct MockPeer {
    link: LinkId,
    name: &'static str,
    peer_name: &'static str,
    network: Network,
    calls: Arc<Mutex<Vec<(LinkId, Call)>>>,
    events: EngineEvents,
    state: Mutex<PeerState>,
}

pub fn mock_candidate(owner: &str, n: u32) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{owner}{n} 1 udp 2122260223 10.0.0.{n} 5000{n} typ host"),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
    }
}

fn kind_name(kind: TrackKind) -> &'static str {
    match kind {
        TrackKind::Audio => "audio",
        TrackKind::Video => "video",
    }
}

impl MockPeer {
    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push((self.link, call));
    }

    fn describe(&self) -> String {
        let mut state = self.state.lock().unwrap();
        state.version += 1;
        let mut sdp = format!(
            "v=0\r\no=mock-{} {} {} IN IP4 0.0.0.0\r\ns=-\r\n",
            self.name, self.link.0, state.version
        );
        for track in &state.tracks {
            sdp.push_str(&format!("a=track:{} {}\r\n", track.id, kind_name(track.kind)));
        }
        for label in &state.channels {
            sdp.push_str(&format!("a=channel:{label}\r\n"));
        }
        sdp
    }

    /// После обоих описаний соединение считается установленным
    fn progress(&self) {
        let mut events = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            if !(state.has_local && state.has_remote) {
                return;
            }
            if !state.connected {
                state.connected = true;
                events.push(EngineEvent::ConnectivityChanged(ConnectivityState::Connected));
            }
            let unopened: Vec<String> = state
                .channels
                .iter()
                .filter(|l| !state.opened.contains(*l))
                .cloned()
                .collect();
            for label in unopened {
                state.opened.push(label.clone());
                events.push(EngineEvent::DataChannelStateChanged {
                    label,
                    state: DataChannelState::Open,
                });
            }
        }
        for event in events {
            self.events.emit(event);
        }
    }
}

#[async_trait]
impl EnginePeer for MockPeer {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription> {
        self.record(Call::CreateOffer);
        if ice_restart {
            self.record(Call::IceRestart);
        }
        Ok(SessionDescription::offer(self.describe()))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record(Call::CreateAnswer);
        Ok(SessionDescription::answer(self.describe()))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.record(Call::SetLocal(desc.sdp_type));
        let send_candidates = {
            let mut state = self.state.lock().unwrap();
            state.has_local = true;
            !std::mem::replace(&mut state.candidates_sent, true)
        };
        if send_candidates {
            for n in 1..=3 {
                self.events
                    .emit(EngineEvent::LocalCandidate(mock_candidate(self.name, n)));
            }
        }
        self.progress();
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.record(Call::SetRemote(desc.sdp_type));
        let mut events = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            state.has_remote = true;

            let mut seen = Vec::new();
            for line in desc.sdp.split("\r\n") {
                if let Some(rest) = line.strip_prefix("a=track:") {
                    let Some((id, kind)) = rest.split_once(' ') else {
                        continue;
                    };
                    seen.push(id.to_owned());
                    if !state.remote_tracks.iter().any(|t| t == id) {
                        state.remote_tracks.push(id.to_owned());
                        events.push(EngineEvent::RemoteTrackAdded(RemoteTrack {
                            id: id.to_owned(),
                            stream_id: format!("mock-{}", self.peer_name),
                            kind: if kind == "audio" {
                                TrackKind::Audio
                            } else {
                                TrackKind::Video
                            },
                        }));
                    }
                } else if let Some(label) = line.strip_prefix("a=channel:") {
                    if !state.channels.iter().any(|l| l == label) {
                        state.channels.push(label.to_owned());
                        events.push(EngineEvent::DataChannelCreated(label.to_owned()));
                    }
                }
            }

            let gone: Vec<String> = state
                .remote_tracks
                .iter()
                .filter(|t| !seen.contains(*t))
                .cloned()
                .collect();
            state.remote_tracks.retain(|t| seen.contains(t));
            events.extend(gone.into_iter().map(EngineEvent::RemoteTrackRemoved));
        }
        for event in events {
            self.events.emit(event);
        }
        self.progress();
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.record(Call::Rollback);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.record(Call::AddCandidate(candidate.candidate));
        Ok(())
    }

    async fn add_track(&self, track: MediaTrack) -> Result<()> {
        self.record(Call::AddTrack(track.id.clone()));
        self.state.lock().unwrap().tracks.push(track);
        Ok(())
    }

    async fn remove_track(&self, track_id: &str) -> Result<()> {
        self.record(Call::RemoveTrack(track_id.to_owned()));
        self.state.lock().unwrap().tracks.retain(|t| t.id != track_id);
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> Result<()> {
        self.record(Call::CreateDataChannel(label.to_owned()));
        self.state.lock().unwrap().channels.push(label.to_owned());
        Ok(())
    }

    async fn send(&self, label: &str, data: Bytes) -> Result<()> {
        self.record(Call::Send(label.to_owned(), data.clone()));
        let peer = self.network.lock().unwrap().get(self.peer_name).cloned();
        if let Some(peer) = peer {
            peer.emit(EngineEvent::DataChannelMessage {
                label: label.to_owned(),
                data,
            });
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.record(Call::Close);
        Ok(())
    }
}

/// Ждёт первое событие, подходящее под `pred`, пропуская остальные
pub async fn next_matching(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    what: &str,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    let wait = async {
        while let Some(event) = events.recv().await {
            if pred(&event) {
                return Some(event);
            }
        }
        None
    };
    match tokio::time::timeout(TIMEOUT, wait).await {
        Ok(Some(event)) => event,
        Ok(None) => panic!("event stream ended while waiting for {what}"),
        Err(_) => panic!("timed out waiting for {what}"),
    }
}

pub async fn wait_state(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    state: NegotiationState,
) {
    next_matching(events, &format!("{state}"), |e| {
        matches!(e, SessionEvent::NegotiationStateChanged { state: s, .. } if *s == state)
    })
    .await;
}

/// Ждёт, пока снимок сессии не покажет `state`
pub async fn wait_snapshot_state(handle: &SessionHandle, state: NegotiationState) {
    for _ in 0..500 {
        if matches!(handle.snapshot().await, Ok(s) if s.state == state) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("session never settled in {state}");
}

pub async fn wait_room_size(relay: &Relay, room: &str, size: usize) {
    for _ in 0..500 {
        if relay.room_size(room).await == size {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("room {room} never reached {size} participant(s)");
}

/// Ждёт, пока условие на журнале вызовов движка не выполнится
pub async fn wait_calls(engine: &MockEngine, what: &str, pred: impl Fn(&[Call]) -> bool) {
    for _ in 0..500 {
        if pred(&engine.calls()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("engine never reached: {what}; calls: {:?}", engine.calls());
}
