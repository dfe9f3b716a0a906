use crate::error::MisuseError;
use crate::peer::engine::{EngineEvent, EngineEvents};
use crate::peer::types::DataChannelState;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;

/// Data-channel'ы одного PeerLink по меткам
#[derive(Debug, Default, Clone)]
pub struct DataChannels {
    channels: BTreeMap<String, DataChannelState>,
}

impl DataChannels {
    pub fn contains(&self, label: &str) -> bool {
        self.channels.contains_key(label)
    }

    pub fn state(&self, label: &str) -> Option<DataChannelState> {
        self.channels.get(label).copied()
    }

    /// Регистрирует новый канал в состоянии Connecting; false если метка уже есть
    pub fn insert_connecting(&mut self, label: &str) -> bool {
        if self.channels.contains_key(label) {
            return false;
        }
        self.channels
            .insert(label.to_owned(), DataChannelState::Connecting);
        true
    }

    /// Обновляет состояние; true если оно изменилось
    pub fn update(&mut self, label: &str, state: DataChannelState) -> bool {
        match self.channels.insert(label.to_owned(), state) {
            Some(prev) => prev != state,
            None => true,
        }
    }

    /// Отправка разрешена только в Open
    pub fn check_send(&self, label: &str) -> Result<(), MisuseError> {
        match self.channels.get(label) {
            Some(DataChannelState::Open) => Ok(()),
            _ => Err(MisuseError::DataChannelNotOpen(label.to_owned())),
        }
    }

    /// Закрывает все каналы, возвращает метки тех, что ещё не были закрыты
    pub fn close_all(&mut self) -> Vec<String> {
        let mut closed = Vec::new();
        for (label, state) in self.channels.iter_mut() {
            if *state != DataChannelState::Closed {
                *state = DataChannelState::Closed;
                closed.push(label.clone());
            }
        }
        closed
    }

    pub fn snapshot(&self) -> Vec<(String, DataChannelState)> {
        self.channels
            .iter()
            .map(|(label, state)| (label.clone(), *state))
            .collect()
    }
}

/// общий обработчик data-channel
pub fn attach_dc(dc: &Arc<RTCDataChannel>, events: EngineEvents) {
    let label = dc.label().to_owned();
    debug!("attach_dc called for '{label}'");

    dc.on_open(Box::new({
        let events = events.clone();
        let label = label.clone();
        move || {
            info!("Data channel '{label}' opened");
            events.emit(EngineEvent::DataChannelStateChanged {
                label: label.clone(),
                state: DataChannelState::Open,
            });
            Box::pin(async {})
        }
    }));

    dc.on_message(Box::new({
        let events = events.clone();
        let label = label.clone();
        move |msg: DataChannelMessage| {
            debug!("Received message on '{label}', length: {}", msg.data.len());
            events.emit(EngineEvent::DataChannelMessage {
                label: label.clone(),
                data: msg.data,
            });
            Box::pin(async {})
        }
    }));

    dc.on_close(Box::new(move || {
        info!("Data channel '{label}' closed");
        events.emit(EngineEvent::DataChannelStateChanged {
            label: label.clone(),
            state: DataChannelState::Closed,
        });
        Box::pin(async {})
    }));
}
