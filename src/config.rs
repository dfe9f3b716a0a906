// Конфигурация приложения
// Логирование можно отключить только в режиме разработки

use crate::error::{Error, Result};
use crate::peer::types::ServerConfig;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // В режиме отладки логирование включено

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // В продакшене логирование отключено

// Дополнительные настройки для режима разработки
#[cfg(debug_assertions)]
pub mod dev {
    // Для полного отключения логирования в режиме разработки
    // измените эту константу на false
    pub const ENABLE_LOGGING: bool = true;
}

#[cfg(not(debug_assertions))]
pub mod dev {
    pub const ENABLE_LOGGING: bool = false;
}

/// Метка data-channel по умолчанию
pub const DEFAULT_DATA_CHANNEL_LABEL: &str = "ssc-data";

/// Адрес сигнального relay по умолчанию
pub const DEFAULT_SIGNALING_URL: &str = "ws://127.0.0.1:4000";

/// Настройки одной сессии (комнаты)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionConfig {
    #[serde(deserialize_with = "room_id_string")]
    pub room_id: String,
    #[serde(default = "default_signaling_url")]
    pub signaling_url: String,
    /// Предпочитаемые кодеки, по порядку (рекомендация, не требование)
    #[serde(default)]
    pub preferred_codecs: Vec<String>,
    /// STUN/TURN серверы; какой из них сработает, решает движок
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<ServerConfig>,
    #[serde(default = "default_data_channel_label")]
    pub data_channel_label: String,
}

impl SessionConfig {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            signaling_url: default_signaling_url(),
            preferred_codecs: Vec::new(),
            ice_servers: default_ice_servers(),
            data_channel_label: default_data_channel_label(),
        }
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: SessionConfig = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Читает конфигурацию из JSON-файла
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.room_id.trim().is_empty() {
            return Err(Error::Config("room id cannot be empty".into()));
        }

        if self.data_channel_label.is_empty() {
            return Err(Error::Config("data channel label cannot be empty".into()));
        }

        // Валидация серверов
        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(Error::Config(format!(
                    "ICE server '{}': URL cannot be empty",
                    server.id
                )));
            }

            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none())
            {
                return Err(Error::Config(format!(
                    "TURN server '{}' requires username and credential",
                    server.id
                )));
            }
        }
        Ok(())
    }
}

fn default_signaling_url() -> String {
    DEFAULT_SIGNALING_URL.into()
}

fn default_data_channel_label() -> String {
    DEFAULT_DATA_CHANNEL_LABEL.into()
}

/// Дефолтные публичные STUN серверы
pub fn default_ice_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            r#type: "stun".into(),
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
}

// relay приводит roomId к строке, поэтому число тоже допустимо
fn room_id_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "roomId must be a string or a number, got {other}"
        ))),
    }
}
