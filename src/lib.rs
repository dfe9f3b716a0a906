//! Звонок один-на-один в комнате через сигнальный relay.
//!
//! [`Session`] подключается к комнате, сам договаривается о роли,
//! обменивается описаниями сессии и ICE-кандидатами и отдаёт наверх
//! поток [`SessionEvent`]. Медиа и ICE делает движок за трейтом
//! [`peer::Engine`]; по умолчанию это [`peer::WebRtcEngine`].

pub mod config;
pub mod error;
pub mod logger;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

pub use config::SessionConfig;
pub use error::{Error, MisuseError, Result};
pub use peer::{MediaTrack, NegotiationState, Role, SessionEvent, SessionSnapshot, SessionStatus};
pub use session::{Session, SessionHandle};
pub use signaling::{SignalingLink, SignalingMessage};
