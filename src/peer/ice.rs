use crate::peer::types::IceCandidate;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Очередь удалённых кандидатов, ожидающих remote description.
/// Только добавление, пока очередь не слита целиком.
#[derive(Debug, Default, Clone)]
pub struct CandidateQueue {
    queue: VecDeque<IceCandidate>,
}

impl CandidateQueue {
    pub fn push(&mut self, candidate: IceCandidate) {
        self.queue.push_back(candidate);
        debug!("Queued remote candidate, pending count: {}", self.queue.len());
    }

    /// Забирает все кандидаты в порядке получения
    pub fn drain(&mut self) -> Vec<IceCandidate> {
        self.queue.drain(..).collect()
    }

    /// Переносит содержимое другой очереди в конец этой
    pub fn append(&mut self, other: &mut CandidateQueue) {
        self.queue.append(&mut other.queue);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

/// Статистика по типам кандидатов
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateStats {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn analyze_candidates<'a>(candidates: impl IntoIterator<Item = &'a IceCandidate>) -> CandidateStats {
    let mut stats = CandidateStats::default();

    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            stats.host += 1;
        } else if candidate.candidate.contains("typ srflx") {
            stats.srflx += 1;
        } else if candidate.candidate.contains("typ relay") {
            stats.relay += 1;
        }
    }

    debug!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        stats.host, stats.srflx, stats.relay
    );

    if stats.host + stats.srflx + stats.relay > 0 && stats.relay == 0 {
        warn!("No TURN relay candidates found! Connection through NAT may fail.");
    }
    stats
}
