use std::fmt::Display;

use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Listings,
    Details,
}

impl Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Listings => write!(f, "listings"),
            Phase::Details => write!(f, "details"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub phase: Phase,
    pub done: usize,
    pub total: usize,
}

impl Progress {
    pub fn listings(done: usize, total: usize) -> Self {
        Progress {
            phase: Phase::Listings,
            done,
            total,
        }
    }

    pub fn details(done: usize, total: usize) -> Self {
        Progress {
            phase: Phase::Details,
            done,
            total,
        }
    }
}

/// Receives progress of one employer crawl. Implementations must not block,
/// they are called from inside the crawl.
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: Progress);
}

pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn report(&self, _progress: Progress) {}
}

impl ProgressSink for mpsc::UnboundedSender<Progress> {
    fn report(&self, progress: Progress) {
        if let Err(e) = self.send(progress) {
            debug!("progress receiver dropped: {}", e);
        }
    }
}
