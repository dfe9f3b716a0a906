pub mod adapter;
pub mod connection;
pub mod data_channel;
pub mod engine;
pub mod ice;
pub mod negotiator;
pub mod sdp;
pub mod state;
pub mod tracks;
pub mod types;

pub use connection::WebRtcEngine;
pub use engine::{Engine, EngineEvent, EngineEvents, EnginePeer};
pub use negotiator::Negotiator;
pub use state::{NegotiationState, Role, SessionSnapshot};
pub use types::{
    CloseReason, ConnectivityState, DataChannelState, IceCandidate, LinkId, MediaTrack,
    RemoteTrack, SdpType, ServerConfig, SessionDescription, SessionEvent, SessionStatus,
    TrackKind, TrackSource,
};
