//! Сообщения сигнализации и их JSON-кодек.
//!
//! Кадр на проводе: `{"event": "<имя>", "data": {...}}`. Имена событий и
//! поля payload совпадают с протоколом relay-сервера комнат.

pub mod relay;
pub mod ws;

use crate::error::{Error, Result};
use crate::peer::types::{IceCandidate, SdpType, SessionDescription};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

pub const JOIN_ROOM: &str = "join room";
pub const NEW_USER_JOINED: &str = "new user joined";
pub const OFFER: &str = "offer";
pub const ANSWER: &str = "answer";
pub const NEW_ICE_CANDIDATE: &str = "new ice candidate";
pub const LEAVE_ROOM: &str = "leave room";
pub const NOTICE: &str = "message";

/// Сообщение сигнализации. `room_id` у offer/answer/candidate
/// необязателен: relay вырезает его при пересылке.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingMessage {
    JoinRoom {
        room_id: String,
    },
    NewUserJoined,
    Offer {
        room_id: Option<String>,
        offer: SessionDescription,
    },
    Answer {
        room_id: Option<String>,
        answer: SessionDescription,
    },
    IceCandidate {
        room_id: Option<String>,
        candidate: IceCandidate,
    },
    LeaveRoom {
        room_id: String,
    },
    /// Служебное сообщение relay
    Notice {
        message: String,
    },
}

/// Что транспорт сигнализации сообщает сессии
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    Connected,
    Message(SignalingMessage),
    /// Кадр не разобран; сессия только логирует его
    Malformed(String),
    Disconnected,
}

/// Двунаправленный канал к relay
pub struct SignalingLink {
    pub outbound: mpsc::UnboundedSender<SignalingMessage>,
    pub inbound: mpsc::UnboundedReceiver<SignalingEvent>,
}

#[derive(Serialize, Deserialize)]
struct Frame {
    event: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    data: Value,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoomPayload {
    #[serde(default, deserialize_with = "room_id_opt")]
    room_id: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OfferPayload {
    #[serde(
        default,
        deserialize_with = "room_id_opt",
        skip_serializing_if = "Option::is_none"
    )]
    room_id: Option<String>,
    offer: SessionDescription,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnswerPayload {
    #[serde(
        default,
        deserialize_with = "room_id_opt",
        skip_serializing_if = "Option::is_none"
    )]
    room_id: Option<String>,
    answer: SessionDescription,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandidatePayload {
    #[serde(
        default,
        deserialize_with = "room_id_opt",
        skip_serializing_if = "Option::is_none"
    )]
    room_id: Option<String>,
    ice_candidate: IceCandidate,
}

#[derive(Serialize, Deserialize)]
struct NoticePayload {
    message: String,
}

impl SignalingMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            SignalingMessage::JoinRoom { .. } => JOIN_ROOM,
            SignalingMessage::NewUserJoined => NEW_USER_JOINED,
            SignalingMessage::Offer { .. } => OFFER,
            SignalingMessage::Answer { .. } => ANSWER,
            SignalingMessage::IceCandidate { .. } => NEW_ICE_CANDIDATE,
            SignalingMessage::LeaveRoom { .. } => LEAVE_ROOM,
            SignalingMessage::Notice { .. } => NOTICE,
        }
    }

    /// Room id, если сообщение его несёт
    pub fn room_id(&self) -> Option<&str> {
        match self {
            SignalingMessage::JoinRoom { room_id } | SignalingMessage::LeaveRoom { room_id } => {
                Some(room_id.as_str())
            }
            SignalingMessage::Offer { room_id, .. }
            | SignalingMessage::Answer { room_id, .. }
            | SignalingMessage::IceCandidate { room_id, .. } => room_id.as_deref(),
            SignalingMessage::NewUserJoined | SignalingMessage::Notice { .. } => None,
        }
    }

    /// Копия без room id, как её пересылает relay
    pub fn without_room(&self) -> SignalingMessage {
        match self.clone() {
            SignalingMessage::Offer { offer, .. } => SignalingMessage::Offer {
                room_id: None,
                offer,
            },
            SignalingMessage::Answer { answer, .. } => SignalingMessage::Answer {
                room_id: None,
                answer,
            },
            SignalingMessage::IceCandidate { candidate, .. } => SignalingMessage::IceCandidate {
                room_id: None,
                candidate,
            },
            other => other,
        }
    }

    pub fn encode(&self) -> Result<String> {
        let data = match self.clone() {
            SignalingMessage::JoinRoom { room_id } | SignalingMessage::LeaveRoom { room_id } => {
                serde_json::to_value(RoomPayload {
                    room_id: Some(room_id),
                })?
            }
            SignalingMessage::NewUserJoined => Value::Null,
            SignalingMessage::Offer { room_id, offer } => {
                serde_json::to_value(OfferPayload { room_id, offer })?
            }
            SignalingMessage::Answer { room_id, answer } => {
                serde_json::to_value(AnswerPayload { room_id, answer })?
            }
            SignalingMessage::IceCandidate { room_id, candidate } => {
                serde_json::to_value(CandidatePayload {
                    room_id,
                    ice_candidate: candidate,
                })?
            }
            SignalingMessage::Notice { message } => serde_json::to_value(NoticePayload { message })?,
        };
        let frame = Frame {
            event: self.event_name().to_owned(),
            data,
        };
        Ok(serde_json::to_string(&frame)?)
    }

    /// Разбирает кадр и проверяет схему payload
    pub fn decode(text: &str) -> Result<Self> {
        let frame: Frame =
            serde_json::from_str(text).map_err(|e| Error::Malformed(format!("bad frame: {e}")))?;
        let event = frame.event.as_str();

        let msg = match event {
            JOIN_ROOM | LEAVE_ROOM => {
                let p: RoomPayload = payload(event, frame.data)?;
                let room_id = p
                    .room_id
                    .ok_or_else(|| Error::Malformed(format!("'{event}' without roomId")))?;
                if event == JOIN_ROOM {
                    SignalingMessage::JoinRoom { room_id }
                } else {
                    SignalingMessage::LeaveRoom { room_id }
                }
            }
            NEW_USER_JOINED => SignalingMessage::NewUserJoined,
            OFFER => {
                let p: OfferPayload = payload(event, frame.data)?;
                check_description(event, &p.offer, SdpType::Offer)?;
                SignalingMessage::Offer {
                    room_id: p.room_id,
                    offer: p.offer,
                }
            }
            ANSWER => {
                let p: AnswerPayload = payload(event, frame.data)?;
                check_description(event, &p.answer, SdpType::Answer)?;
                SignalingMessage::Answer {
                    room_id: p.room_id,
                    answer: p.answer,
                }
            }
            NEW_ICE_CANDIDATE => {
                let p: CandidatePayload = payload(event, frame.data)?;
                if p.ice_candidate.candidate.is_empty() {
                    return Err(Error::Malformed("empty ICE candidate".into()));
                }
                SignalingMessage::IceCandidate {
                    room_id: p.room_id,
                    candidate: p.ice_candidate,
                }
            }
            NOTICE => {
                let p: NoticePayload = payload(event, frame.data)?;
                SignalingMessage::Notice { message: p.message }
            }
            other => return Err(Error::Malformed(format!("unknown event '{other}'"))),
        };
        Ok(msg)
    }
}

fn payload<T: DeserializeOwned>(event: &str, data: Value) -> Result<T> {
    serde_json::from_value(data).map_err(|e| Error::Malformed(format!("'{event}': {e}")))
}

fn check_description(event: &str, desc: &SessionDescription, expected: SdpType) -> Result<()> {
    if desc.sdp_type != expected {
        return Err(Error::Malformed(format!(
            "'{event}' carries a description of type '{}'",
            desc.sdp_type
        )));
    }
    if desc.sdp.trim().is_empty() {
        return Err(Error::Malformed(format!("'{event}' has an empty sdp")));
    }
    Ok(())
}

// relay приводит roomId к строке, клиенты шлют и числа
fn room_id_opt<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "roomId must be a string or a number, got {other}"
        ))),
    }
}
