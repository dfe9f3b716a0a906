use thiserror::Error;

/// Результат операций крейта
pub type Result<T> = std::result::Result<T, Error>;

/// Ошибки сессии
#[derive(Error, Debug)]
pub enum Error {
    /// Сигнальный канал недоступен или оборвался
    #[error("signaling transport error: {0}")]
    Transport(String),

    /// Сообщение сигнализации не разобрано или нарушает схему
    #[error("malformed signaling message: {0}")]
    Malformed(String),

    /// Движок не смог создать или применить описание сессии
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// Операция запрещена в текущем состоянии
    #[error(transparent)]
    Misuse(#[from] MisuseError),

    /// Ошибка внешнего медиа-движка
    #[error("media engine error: {0}")]
    Engine(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Задача сессии уже завершилась
    #[error("session is no longer running")]
    SessionGone,

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Синхронные отказы: состояние не меняется
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MisuseError {
    #[error("a negotiation round is already in progress")]
    NegotiationInProgress,

    #[error("no peer link exists")]
    NoPeerLink,

    #[error("data channel '{0}' is not open")]
    DataChannelNotOpen(String),

    #[error("answer received without an outstanding local offer")]
    UnexpectedAnswer,

    #[error("offer received while another negotiation step is pending")]
    UnexpectedOffer,

    #[error("data channel label must not be empty")]
    InvalidLabel,

    #[error("session is closed")]
    SessionClosed,
}

impl From<webrtc::Error> for Error {
    fn from(e: webrtc::Error) -> Self {
        Error::Engine(e.to_string())
    }
}
