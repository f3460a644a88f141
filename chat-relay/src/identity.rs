use std::sync::atomic::{AtomicU64, Ordering};

use nanoid::nanoid;

use crate::participant::ParticipantId;

/// Source of participant ids. Every call must return an id not handed out before.
pub trait IdentityProvider: Send + Sync {
    fn next_id(&self) -> ParticipantId;
}

/// Random 21-character URL-safe ids.
#[derive(Debug, Default, Clone, Copy)]
pub struct NanoidIdentities;

impl IdentityProvider for NanoidIdentities {
    fn next_id(&self) -> ParticipantId {
        ParticipantId::new(nanoid!())
    }
}

/// Predictable `<prefix>-<n>` ids, counting from 1.
#[derive(Debug)]
pub struct SequentialIdentities {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIdentities {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl IdentityProvider for SequentialIdentities {
    fn next_id(&self) -> ParticipantId {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        ParticipantId::new(format!("{}-{n}", self.prefix))
    }
}
