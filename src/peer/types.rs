use crate::error::{Error, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Тип описания сессии на проводе
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpType::Offer => f.write_str("offer"),
            SdpType::Answer => f.write_str("answer"),
        }
    }
}

/// Описание сессии: `{type, sdp}`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    pub fn to_rtc(&self) -> Result<RTCSessionDescription> {
        let desc = match self.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(self.sdp.clone())?,
            SdpType::Answer => RTCSessionDescription::answer(self.sdp.clone())?,
        };
        Ok(desc)
    }
}

impl TryFrom<RTCSessionDescription> for SessionDescription {
    type Error = Error;

    fn try_from(desc: RTCSessionDescription) -> Result<Self> {
        let sdp_type = match desc.sdp_type {
            RTCSdpType::Offer => SdpType::Offer,
            RTCSdpType::Answer => SdpType::Answer,
            other => {
                return Err(Error::Engine(format!(
                    "unsupported session description type: {other}"
                )))
            }
        };
        Ok(Self {
            sdp_type,
            sdp: desc.sdp,
        })
    }
}

/// ICE кандидат для WebRTC соединения
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(c: IceCandidate) -> Self {
        RTCIceCandidateInit {
            candidate: c.candidate,
            sdp_mid: c.sdp_mid,
            sdp_mline_index: c.sdp_mline_index,
            username_fragment: None,
        }
    }
}

/// Конфигурация ICE сервера
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Откуда берутся кадры локального трека
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TrackSource {
    Microphone,
    Camera,
    Screen,
    File,
}

/// Локальный медиа-трек
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
    pub source: TrackSource,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind, source: TrackSource) -> Self {
        Self {
            id: id.into(),
            kind,
            source,
        }
    }

    pub fn camera(id: impl Into<String>) -> Self {
        Self::new(id, TrackKind::Video, TrackSource::Camera)
    }

    pub fn screen(id: impl Into<String>) -> Self {
        Self::new(id, TrackKind::Video, TrackSource::Screen)
    }

    pub fn microphone(id: impl Into<String>) -> Self {
        Self::new(id, TrackKind::Audio, TrackSource::Microphone)
    }
}

/// Трек, пришедший от удалённой стороны
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: TrackKind,
}

/// Состояние связности, как его видит движок
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataChannelState {
    Connecting,
    Open,
    Closed,
}

/// Идентификатор PeerLink; новый на каждое соединение
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u64);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

/// Статус для вызывающей стороны
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Connecting,
    Connected,
    Disconnected,
    Closed,
}

/// Почему PeerLink был закрыт
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Пользователь вышел из комнаты
    Left,
    /// Сигнальный канал оборвался
    SignalingLost,
    /// Движок сообщил disconnected/failed
    Connectivity(ConnectivityState),
    /// Создание или применение описания не удалось
    NegotiationFailed(String),
    /// Собеседник зашёл в комнату заново
    PeerRestarted,
}

/// События, которые сессия отдаёт наверх
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Status(SessionStatus),
    NegotiationStateChanged {
        state: super::state::NegotiationState,
        role: super::state::Role,
    },
    RemoteTrackAdded(RemoteTrack),
    RemoteTrackRemoved {
        track_id: String,
    },
    DataChannelStateChanged {
        label: String,
        state: DataChannelState,
    },
    DataChannelMessage {
        label: String,
        data: Bytes,
    },
    /// Служебное сообщение relay ("Room is full" и т.п.)
    RelayNotice(String),
    Closed {
        reason: CloseReason,
    },
}
