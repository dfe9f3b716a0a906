use crate::peer::types::MediaTrack;
use std::collections::VecDeque;

/// Упорядоченный набор треков без повторов id
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TrackSet {
    tracks: Vec<MediaTrack>,
}

/// Разница между двумя наборами треков
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TrackDelta {
    pub added: Vec<MediaTrack>,
    pub removed: Vec<String>,
}

impl TrackDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

impl TrackSet {
    pub fn new(tracks: impl IntoIterator<Item = MediaTrack>) -> Self {
        let mut set = TrackSet::default();
        for track in tracks {
            // последний трек с тем же id побеждает
            if let Some(existing) = set.tracks.iter_mut().find(|t| t.id == track.id) {
                *existing = track;
            } else {
                set.tracks.push(track);
            }
        }
        set
    }

    pub fn iter(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter()
    }

    pub fn ids(&self) -> Vec<String> {
        self.tracks.iter().map(|t| t.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.id == id)
    }

    /// Что нужно убрать из `self` и добавить, чтобы получить `next`.
    /// Трек с тем же id, но другим kind/source, пересоздаётся.
    pub fn diff(&self, next: &TrackSet) -> TrackDelta {
        let removed = self
            .tracks
            .iter()
            .filter(|t| next.get(&t.id) != Some(*t))
            .map(|t| t.id.clone())
            .collect();
        let added = next
            .tracks
            .iter()
            .filter(|t| self.get(&t.id) != Some(*t))
            .cloned()
            .collect();
        TrackDelta { added, removed }
    }

    pub fn with(&self, track: MediaTrack) -> TrackSet {
        TrackSet::new(self.tracks.iter().cloned().chain(std::iter::once(track)))
    }

    pub fn without(&self, id: &str) -> TrackSet {
        TrackSet::new(self.tracks.iter().filter(|t| t.id != id).cloned())
    }
}

/// Желаемые локальные треки и каналы. Пока PeerLink нет, это база для
/// следующего offer; во время раунда здесь копятся отложенные open-запросы.
#[derive(Debug, Default)]
pub struct LocalMedia {
    pub tracks: TrackSet,
    /// Каналы, которые инициатор создаёт до первого offer
    pub channels: Vec<String>,
    /// Запросы open_data_channel, ждущие конца раунда
    pub queued_opens: VecDeque<String>,
}

impl LocalMedia {
    pub fn want_channel(&mut self, label: &str) {
        if !self.channels.iter().any(|l| l == label) {
            self.channels.push(label.to_owned());
        }
    }

    pub fn queue_open(&mut self, label: &str) {
        if !self.queued_opens.iter().any(|l| l == label) {
            self.queued_opens.push_back(label.to_owned());
        }
    }
}
