//! Движок на webrtc-rs: одно RTCPeerConnection на каждый PeerLink.

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::logger::{dump_candidate, dump_selected_pair};
use crate::peer::data_channel::attach_dc;
use crate::peer::engine::{Engine, EngineEvent, EngineEvents, EnginePeer};
use crate::peer::ice::analyze_candidates;
use crate::peer::types::{
    ConnectivityState, IceCandidate, LinkId, MediaTrack, RemoteTrack, ServerConfig,
    SessionDescription, TrackKind,
};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

type LocalTracks = Arc<Mutex<HashMap<String, Arc<TrackLocalStaticSample>>>>;
type Channels = Arc<Mutex<HashMap<String, Arc<RTCDataChannel>>>>;

/// Фабрика соединений webrtc-rs.
///
/// Локальные треки живут дольше отдельных соединений: внешний захват
/// получает трек через [`WebRtcEngine::local_track`] и пишет в него сэмплы,
/// а каждое новое соединение отправляет тот же трек.
pub struct WebRtcEngine {
    ice_servers: Vec<ServerConfig>,
    local_tracks: LocalTracks,
}

impl WebRtcEngine {
    pub fn new(ice_servers: Vec<ServerConfig>) -> Self {
        Self {
            ice_servers,
            local_tracks: Arc::default(),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.ice_servers.clone())
    }

    /// Трек для записи сэмплов; появляется после первого `add_track` с этим id
    pub async fn local_track(&self, id: &str) -> Option<Arc<TrackLocalStaticSample>> {
        self.local_tracks.lock().await.get(id).cloned()
    }

    async fn open_peer(&self, link: LinkId, events: EngineEvents) -> Result<WebRtcPeer> {
        let mut media = MediaEngine::default();
        media.register_default_codecs()?;
        let registry = register_default_interceptors(Default::default(), &mut media)?;

        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(api.new_peer_connection(rtc_config(&self.ice_servers)).await?);
        let channels = Channels::default();
        install_handlers(&pc, &events, &channels);
        info!("{link}: peer connection created");

        Ok(WebRtcPeer {
            link,
            pc,
            events,
            local_tracks: self.local_tracks.clone(),
            senders: Mutex::default(),
            channels,
        })
    }
}

#[async_trait]
impl Engine for WebRtcEngine {
    async fn create_peer(&self, link: LinkId, events: EngineEvents) -> Result<Box<dyn EnginePeer>> {
        Ok(Box::new(self.open_peer(link, events).await?))
    }
}

/// Создает конфигурацию для peer connection
fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: get_user_ice_servers(servers),
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn get_user_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

fn install_handlers(pc: &Arc<RTCPeerConnection>, events: &EngineEvents, channels: &Channels) {
    let link = events.link();

    let gathered: Arc<std::sync::Mutex<Vec<IceCandidate>>> = Arc::default();
    pc.on_ice_candidate(Box::new({
        let events = events.clone();
        move |cand: Option<RTCIceCandidate>| {
            let events = events.clone();
            let gathered = gathered.clone();
            Box::pin(async move {
                let Some(c) = cand else {
                    // None означает конец сбора
                    info!("{}: ICE candidate gathering completed", events.link());
                    if let Ok(list) = gathered.lock() {
                        analyze_candidates(list.iter());
                    }
                    return;
                };
                match c.to_json() {
                    Ok(init) => {
                        dump_candidate("LOCAL", &init);
                        let candidate = IceCandidate::from(init);
                        if let Ok(mut list) = gathered.lock() {
                            list.push(candidate.clone());
                        }
                        events.emit(EngineEvent::LocalCandidate(candidate));
                    }
                    Err(e) => warn!("{}: failed to serialize local candidate: {e}", events.link()),
                }
            })
        }
    }));

    pc.on_ice_gathering_state_change(Box::new(move |state| {
        debug!("{link}: ICE gathering state changed to {state:?}");
        Box::pin(async {})
    }));

    let weak_pc = Arc::downgrade(pc);
    pc.on_peer_connection_state_change(Box::new({
        let events = events.clone();
        move |st: RTCPeerConnectionState| {
            info!("{link}: peer connection state changed to {st:?}");
            let state = match st {
                RTCPeerConnectionState::Connecting => Some(ConnectivityState::Connecting),
                RTCPeerConnectionState::Connected => Some(ConnectivityState::Connected),
                RTCPeerConnectionState::Disconnected => Some(ConnectivityState::Disconnected),
                RTCPeerConnectionState::Failed => Some(ConnectivityState::Failed),
                _ => None,
            };

            if matches!(
                st,
                RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Failed
            ) {
                if let Some(pc) = weak_pc.upgrade() {
                    tokio::spawn(async move {
                        dump_selected_pair(&pc, "BEFORE-FAIL").await;
                    });
                }
            }

            if let Some(state) = state {
                events.emit(EngineEvent::ConnectivityChanged(state));
            }
            Box::pin(async {})
        }
    }));

    pc.on_track(Box::new({
        let events = events.clone();
        move |track: Arc<TrackRemote>, _: Arc<RTCRtpReceiver>, _: Arc<RTCRtpTransceiver>| {
            let events = events.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    RTPCodecType::Video => TrackKind::Video,
                    other => {
                        warn!("{}: ignoring remote track of kind {other:?}", events.link());
                        return;
                    }
                };
                let remote = RemoteTrack {
                    id: track.id().to_string(),
                    stream_id: track.stream_id().to_string(),
                    kind,
                };
                info!("{}: remote {:?} track '{}'", events.link(), kind, remote.id);
                events.emit(EngineEvent::RemoteTrackAdded(remote.clone()));

                // трек живёт, пока читаются пакеты
                tokio::spawn(async move {
                    while track.read_rtp().await.is_ok() {}
                    debug!("{}: remote track '{}' ended", events.link(), remote.id);
                    events.emit(EngineEvent::RemoteTrackRemoved(remote.id));
                });
            })
        }
    }));

    pc.on_data_channel(Box::new({
        let events = events.clone();
        let channels = channels.clone();
        move |dc: Arc<RTCDataChannel>| {
            let events = events.clone();
            let channels = channels.clone();
            Box::pin(async move {
                let label = dc.label().to_owned();
                info!("{}: remote opened data channel '{label}'", events.link());
                events.emit(EngineEvent::DataChannelCreated(label.clone()));
                attach_dc(&dc, events);
                // встречный канал с той же меткой не вытесняет наш
                channels.lock().await.entry(label).or_insert(dc);
            })
        }
    }));
}

struct WebRtcPeer {
    link: LinkId,
    pc: Arc<RTCPeerConnection>,
    events: EngineEvents,
    local_tracks: LocalTracks,
    senders: Mutex<HashMap<String, Arc<RTCRtpSender>>>,
    channels: Channels,
}

impl WebRtcPeer {
    async fn sample_track(&self, track: &MediaTrack) -> Arc<TrackLocalStaticSample> {
        let mut tracks = self.local_tracks.lock().await;
        if let Some(existing) = tracks.get(&track.id) {
            return existing.clone();
        }

        let codec = match track.kind {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
        };
        let local = Arc::new(TrackLocalStaticSample::new(
            codec,
            track.id.clone(),
            format!("stream-{}", self.link.0),
        ));
        tracks.insert(track.id.clone(), local.clone());
        local
    }
}

#[async_trait]
impl EnginePeer for WebRtcPeer {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription> {
        let options = ice_restart.then(|| {
            info!("{}: restarting ICE", self.link);
            RTCOfferOptions {
                ice_restart: true,
                ..Default::default()
            }
        });
        self.pc.create_offer(options).await?.try_into()
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.pc.create_answer(None).await?.try_into()
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc.set_local_description(desc.to_rtc()?).await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc.set_remote_description(desc.to_rtc()?).await?;
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        // пустой SDP webrtc-rs принимает только для offer/answer
        let pending = self
            .pc
            .pending_local_description()
            .await
            .ok_or_else(|| Error::Negotiation("no local offer to roll back".into()))?;
        let mut rollback = RTCSessionDescription::default();
        rollback.sdp_type = RTCSdpType::Rollback;
        rollback.sdp = pending.sdp;
        self.pc.set_local_description(rollback).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc.add_ice_candidate(candidate.into()).await?;
        Ok(())
    }

    async fn add_track(&self, track: MediaTrack) -> Result<()> {
        let local = self.sample_track(&track).await;
        let sender = self
            .pc
            .add_track(local as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        let reader = sender.clone();
        let link = self.link;
        let id = track.id.clone();
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while let Ok((_, _)) = reader.read(&mut rtcp_buf).await {}
            debug!("{link}: RTCP reader for '{id}' stopped");
        });

        info!("{}: sending {:?} track '{}'", self.link, track.kind, track.id);
        self.senders.lock().await.insert(track.id, sender);
        Ok(())
    }

    async fn remove_track(&self, track_id: &str) -> Result<()> {
        let sender = self
            .senders
            .lock()
            .await
            .remove(track_id)
            .ok_or_else(|| Error::Engine(format!("track '{track_id}' is not being sent")))?;
        self.pc.remove_track(&sender).await?;
        info!("{}: stopped sending track '{track_id}'", self.link);
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> Result<()> {
        let dc = self
            .pc
            .create_data_channel(label, Some(RTCDataChannelInit::default()))
            .await?;
        attach_dc(&dc, self.events.clone());
        self.channels.lock().await.insert(label.to_owned(), dc);
        Ok(())
    }

    async fn send(&self, label: &str, data: Bytes) -> Result<()> {
        let dc = self
            .channels
            .lock()
            .await
            .get(label)
            .cloned()
            .ok_or_else(|| Error::Engine(format!("unknown data channel '{label}'")))?;
        dc.send(&data).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.channels.lock().await.clear();
        self.senders.lock().await.clear();
        self.pc.close().await?;
        Ok(())
    }
}
