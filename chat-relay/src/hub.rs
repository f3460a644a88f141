//! The broadcast hub: sole owner of the participant registry.
//!
//! Supervisors submit [`RelayEvent`]s through a [`HubHandle`]. The hub task
//! applies them one at a time in arrival order, so registry mutations and
//! fan-out decisions never race. Nothing outside the hub loop can read or
//! mutate the registry; the only way to observe it is the `Roster` query,
//! which is itself an ordered event.

use std::collections::{HashMap, hash_map::Entry};

use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    config::{OverflowPolicy, RelayConfig},
    error::RelayError,
    participant::{OutboxError, Participant, ParticipantId, SessionId},
};

/// One unit of work for the hub.
#[derive(Debug)]
pub enum RelayEvent {
    /// Register a participant. Nothing is fanned out.
    Join(Participant),
    /// Remove a participant and close its outbox. Ignored unless `session`
    /// matches the registered record, so a rejected duplicate cannot evict
    /// the participant that owns the id.
    Leave {
        id: ParticipantId,
        session: SessionId,
    },
    /// Deliver `text` to every registered participant except `sender`.
    Message { sender: ParticipantId, text: String },
    /// Report the ids currently registered, sorted.
    Roster {
        respond_to: oneshot::Sender<Vec<ParticipantId>>,
    },
}

/// Cloneable intake for the hub. The hub stops once every handle is dropped.
#[derive(Debug, Clone)]
pub struct HubHandle {
    intake: mpsc::Sender<RelayEvent>,
}

impl HubHandle {
    pub async fn join(&self, participant: Participant) -> Result<(), RelayError> {
        self.submit(RelayEvent::Join(participant)).await
    }

    pub async fn leave(&self, id: ParticipantId, session: SessionId) -> Result<(), RelayError> {
        self.submit(RelayEvent::Leave { id, session }).await
    }

    pub async fn message(&self, sender: ParticipantId, text: String) -> Result<(), RelayError> {
        self.submit(RelayEvent::Message { sender, text }).await
    }

    /// Ids registered once every event submitted before this call has been applied.
    pub async fn roster(&self) -> Result<Vec<ParticipantId>, RelayError> {
        let (respond_to, response) = oneshot::channel();
        self.submit(RelayEvent::Roster { respond_to }).await?;
        response.await.map_err(|_| RelayError::HubClosed)
    }

    pub async fn submit(&self, event: RelayEvent) -> Result<(), RelayError> {
        self.intake
            .send(event)
            .await
            .map_err(|_| RelayError::HubClosed)
    }
}

pub struct Hub {
    intake: mpsc::Receiver<RelayEvent>,
    registry: HashMap<ParticipantId, Participant>,
    overflow: OverflowPolicy,
}

impl Hub {
    pub fn new(config: &RelayConfig) -> (Self, HubHandle) {
        let (intake_tx, intake_rx) = mpsc::channel(config.intake_capacity.get());
        let hub = Self {
            intake: intake_rx,
            registry: HashMap::new(),
            overflow: config.overflow,
        };
        (hub, HubHandle { intake: intake_tx })
    }

    /// Starts the hub loop on its own task.
    pub fn spawn(config: &RelayConfig) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(config);
        (handle, tokio::spawn(hub.run()))
    }

    pub async fn run(mut self) {
        while let Some(event) = self.intake.recv().await {
            self.apply(event).await;
        }
        debug!(
            remaining = self.registry.len(),
            "hub intake closed, closing remaining outboxes"
        );
    }

    async fn apply(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Join(participant) => self.join(participant),
            RelayEvent::Leave { id, session } => self.leave(&id, session),
            RelayEvent::Message { sender, text } => self.fan_out(&sender, &text).await,
            RelayEvent::Roster { respond_to } => {
                let _ = respond_to.send(self.roster());
            }
        }
    }

    fn join(&mut self, participant: Participant) {
        match self.registry.entry(participant.id().clone()) {
            Entry::Occupied(existing) => {
                warn!(id = %existing.key(), "rejecting join for an id that is already connected");
                participant.close();
            }
            Entry::Vacant(slot) => {
                info!(id = %slot.key(), peer = ?participant.peer(), "participant joined");
                slot.insert(participant);
            }
        }
    }

    fn leave(&mut self, id: &ParticipantId, session: SessionId) {
        match self.registry.get(id) {
            Some(registered) if registered.session() == session => {}
            Some(_) => {
                debug!(%id, ?session, "ignoring leave from a session that never registered");
                return;
            }
            None => {
                debug!(%id, "ignoring leave for unknown participant");
                return;
            }
        }
        let Some(participant) = self.registry.remove(id) else {
            return;
        };

        info!(
            %id,
            peer = ?participant.peer(),
            connected_for = ?participant.joined_at().elapsed(),
            dropped = participant.dropped(),
            "participant left"
        );
        participant.close();
    }

    async fn fan_out(&mut self, sender: &ParticipantId, text: &str) {
        let overflow = self.overflow;
        for (id, participant) in self.registry.iter_mut() {
            if id == sender {
                continue;
            }

            let outbox = participant.outbox();
            let delivered = match overflow {
                OverflowPolicy::Block => outbox.send(text.to_string()).await,
                OverflowPolicy::DropNewest => outbox.try_send(text.to_string()),
                OverflowPolicy::WaitThenDrop(wait) => {
                    outbox.send_timeout(text.to_string(), wait).await
                }
            };

            match delivered {
                Ok(()) => {}
                Err(OutboxError::Full) => {
                    participant.record_drop();
                    warn!(
                        %id,
                        dropped = participant.dropped(),
                        "outbox full, dropping message"
                    );
                }
                Err(OutboxError::Closed) => {
                    debug!(%id, "writer already stopped, skipping delivery");
                }
            }
        }
    }

    fn roster(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<_> = self.registry.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use std::{num::NonZeroUsize, time::Duration};

    use tokio::time::timeout;

    use super::*;
    use crate::participant::{OutboxReader, outbox};

    fn config(outbox_capacity: usize, overflow: OverflowPolicy) -> RelayConfig {
        RelayConfig {
            outbox_capacity: NonZeroUsize::new(outbox_capacity).expect("non-zero"),
            overflow,
            ..RelayConfig::default()
        }
    }

    fn participant(id: &str, config: &RelayConfig) -> (Participant, OutboxReader) {
        let (outbox, reader) = outbox(config.outbox_capacity);
        (Participant::new(id.into(), None, outbox), reader)
    }

    fn departure(participant: &Participant) -> RelayEvent {
        RelayEvent::Leave {
            id: participant.id().clone(),
            session: participant.session(),
        }
    }

    fn message(sender: &str, text: &str) -> RelayEvent {
        RelayEvent::Message {
            sender: sender.into(),
            text: text.into(),
        }
    }

    fn ids(names: &[&str]) -> Vec<ParticipantId> {
        names.iter().map(|name| ParticipantId::from(*name)).collect()
    }

    async fn next(reader: &mut OutboxReader) -> Option<String> {
        timeout(Duration::from_secs(1), reader.recv())
            .await
            .expect("outbox should yield or close")
    }

    async fn assert_empty(reader: &mut OutboxReader) {
        let pending = timeout(Duration::from_millis(20), reader.recv()).await;
        assert!(pending.is_err(), "outbox should have nothing queued");
    }

    #[tokio::test]
    async fn registry_tracks_joins_and_leaves() {
        let config = RelayConfig::default();
        let (mut hub, _handle) = Hub::new(&config);
        let (alice, _alice_rx) = participant("alice", &config);
        let (bob, _bob_rx) = participant("bob", &config);
        let (carol, _carol_rx) = participant("carol", &config);
        let alice_leaves = departure(&alice);
        let alice_leaves_again = departure(&alice);

        hub.apply(RelayEvent::Join(alice)).await;
        hub.apply(RelayEvent::Join(bob)).await;
        hub.apply(alice_leaves).await;
        hub.apply(RelayEvent::Join(carol)).await;
        hub.apply(alice_leaves_again).await;

        assert_eq!(hub.roster(), ids(&["bob", "carol"]));
    }

    #[tokio::test]
    async fn duplicate_join_keeps_the_first_and_closes_the_second() {
        let config = RelayConfig::default();
        let (mut hub, _handle) = Hub::new(&config);
        let (first, mut first_rx) = participant("alice", &config);
        let (second, mut second_rx) = participant("alice", &config);
        let (bob, _bob_rx) = participant("bob", &config);
        let second_leaves = departure(&second);

        hub.apply(RelayEvent::Join(first)).await;
        hub.apply(RelayEvent::Join(second)).await;
        hub.apply(RelayEvent::Join(bob)).await;
        hub.apply(message("bob", "hi")).await;

        assert_eq!(hub.roster(), ids(&["alice", "bob"]));
        assert_eq!(next(&mut second_rx).await, None);
        assert_eq!(next(&mut first_rx).await.as_deref(), Some("hi"));

        // The rejected session still emits its own leave; it must not evict the first alice.
        hub.apply(second_leaves).await;
        hub.apply(message("bob", "still there?")).await;

        assert_eq!(hub.roster(), ids(&["alice", "bob"]));
        assert_eq!(next(&mut first_rx).await.as_deref(), Some("still there?"));
    }

    #[tokio::test]
    async fn sender_never_receives_its_own_message() {
        let config = RelayConfig::default();
        let (mut hub, _handle) = Hub::new(&config);
        let (alice, mut alice_rx) = participant("alice", &config);
        let (bob, mut bob_rx) = participant("bob", &config);

        hub.apply(RelayEvent::Join(alice)).await;
        hub.apply(RelayEvent::Join(bob)).await;
        hub.apply(message("alice", "alice: hello")).await;

        assert_eq!(next(&mut bob_rx).await.as_deref(), Some("alice: hello"));
        assert_empty(&mut alice_rx).await;
    }

    #[tokio::test]
    async fn leave_closes_outbox_after_earlier_messages() {
        let config = RelayConfig::default();
        let (mut hub, _handle) = Hub::new(&config);
        let (alice, _alice_rx) = participant("alice", &config);
        let (bob, mut bob_rx) = participant("bob", &config);
        let bob_leaves = departure(&bob);

        hub.apply(RelayEvent::Join(alice)).await;
        hub.apply(RelayEvent::Join(bob)).await;
        hub.apply(message("alice", "one")).await;
        hub.apply(message("alice", "two")).await;
        hub.apply(bob_leaves).await;
        hub.apply(message("alice", "three")).await;

        assert_eq!(next(&mut bob_rx).await.as_deref(), Some("one"));
        assert_eq!(next(&mut bob_rx).await.as_deref(), Some("two"));
        assert_eq!(next(&mut bob_rx).await, None);
    }

    #[tokio::test]
    async fn solo_participant_generates_no_traffic() {
        let config = RelayConfig::default();
        let (mut hub, _handle) = Hub::new(&config);
        let (alice, mut alice_rx) = participant("alice", &config);
        let alice_leaves = departure(&alice);

        hub.apply(RelayEvent::Join(alice)).await;
        for n in 0..20 {
            hub.apply(message("alice", &format!("line {n}"))).await;
            assert_eq!(hub.roster(), ids(&["alice"]));
        }

        assert_empty(&mut alice_rx).await;
        hub.apply(alice_leaves).await;
        assert!(hub.roster().is_empty());
        assert_eq!(next(&mut alice_rx).await, None);
    }

    #[tokio::test]
    async fn drop_newest_skips_only_the_full_recipient() {
        let config = config(1, OverflowPolicy::DropNewest);
        let (mut hub, _handle) = Hub::new(&config);
        let (alice, _alice_rx) = participant("alice", &config);
        let (slow, mut slow_rx) = participant("slow", &config);
        let (fast, mut fast_rx) = participant("fast", &config);
        let slow_leaves = departure(&slow);

        hub.apply(RelayEvent::Join(alice)).await;
        hub.apply(RelayEvent::Join(slow)).await;
        hub.apply(RelayEvent::Join(fast)).await;

        hub.apply(message("alice", "first")).await;
        assert_eq!(next(&mut fast_rx).await.as_deref(), Some("first"));
        hub.apply(message("alice", "second")).await;
        assert_eq!(next(&mut fast_rx).await.as_deref(), Some("second"));

        let slow_record = hub.registry.get(&ParticipantId::from("slow")).expect("slow");
        assert_eq!(slow_record.dropped(), 1);

        hub.apply(slow_leaves).await;
        assert_eq!(next(&mut slow_rx).await.as_deref(), Some("first"));
        assert_eq!(next(&mut slow_rx).await, None);
    }

    #[tokio::test]
    async fn wait_then_drop_gives_up_after_the_deadline() {
        let config = config(1, OverflowPolicy::WaitThenDrop(Duration::from_millis(20)));
        let (mut hub, _handle) = Hub::new(&config);
        let (alice, _alice_rx) = participant("alice", &config);
        let (slow, mut slow_rx) = participant("slow", &config);

        hub.apply(RelayEvent::Join(alice)).await;
        hub.apply(RelayEvent::Join(slow)).await;
        hub.apply(message("alice", "first")).await;
        timeout(Duration::from_secs(1), hub.apply(message("alice", "second")))
            .await
            .expect("hub should not stall past the wait");

        let slow_record = hub.registry.get(&ParticipantId::from("slow")).expect("slow");
        assert_eq!(slow_record.dropped(), 1);
        assert_eq!(next(&mut slow_rx).await.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn block_policy_stalls_until_the_writer_catches_up() {
        let config = config(1, OverflowPolicy::Block);
        let (handle, hub_task) = Hub::spawn(&config);
        let (alice, _alice_rx) = participant("alice", &config);
        let (slow, mut slow_rx) = participant("slow", &config);

        handle.join(alice).await.expect("join alice");
        handle.join(slow).await.expect("join slow");
        handle.message("alice".into(), "first".into()).await.expect("first");
        handle.message("alice".into(), "second".into()).await.expect("second");

        let stalled = timeout(Duration::from_millis(50), handle.roster()).await;
        assert!(stalled.is_err(), "hub should be blocked on the full outbox");

        assert_eq!(next(&mut slow_rx).await.as_deref(), Some("first"));
        assert_eq!(next(&mut slow_rx).await.as_deref(), Some("second"));
        let roster = timeout(Duration::from_secs(1), handle.roster())
            .await
            .expect("hub resumes")
            .expect("roster");
        assert_eq!(roster, ids(&["alice", "slow"]));

        drop(handle);
        hub_task.await.expect("hub task");
        assert_eq!(next(&mut slow_rx).await, None);
    }

    #[tokio::test]
    async fn closed_writer_does_not_block_fan_out() {
        let config = config(1, OverflowPolicy::Block);
        let (mut hub, _handle) = Hub::new(&config);
        let (alice, _alice_rx) = participant("alice", &config);
        let (gone, gone_rx) = participant("gone", &config);
        let (bob, mut bob_rx) = participant("bob", &config);
        drop(gone_rx);

        hub.apply(RelayEvent::Join(alice)).await;
        hub.apply(RelayEvent::Join(gone)).await;
        hub.apply(RelayEvent::Join(bob)).await;
        timeout(Duration::from_secs(1), hub.apply(message("alice", "hi")))
            .await
            .expect("closed outbox must not stall the hub");

        assert_eq!(next(&mut bob_rx).await.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn events_apply_in_arrival_order_across_handles() {
        let config = RelayConfig::default();
        let (handle, _hub_task) = Hub::spawn(&config);
        let other = handle.clone();
        let (alice, mut alice_rx) = participant("alice", &config);
        let (bob, mut bob_rx) = participant("bob", &config);
        let bob_session = bob.session();

        handle.join(alice).await.expect("join alice");
        other.message("bob".into(), "before bob".into()).await.expect("send");
        other.join(bob).await.expect("join bob");
        handle.message("alice".into(), "after bob".into()).await.expect("send");
        other.message("bob".into(), "bye".into()).await.expect("send");
        other.leave("bob".into(), bob_session).await.expect("leave bob");
        handle.message("alice".into(), "too late".into()).await.expect("send");

        assert_eq!(next(&mut alice_rx).await.as_deref(), Some("before bob"));
        assert_eq!(next(&mut alice_rx).await.as_deref(), Some("bye"));
        assert_eq!(next(&mut bob_rx).await.as_deref(), Some("after bob"));
        assert_eq!(next(&mut bob_rx).await, None);
        assert_eq!(handle.roster().await.expect("roster"), ids(&["alice"]));
    }

    #[tokio::test]
    async fn handle_reports_closed_hub() {
        let config = RelayConfig::default();
        let (hub, handle) = Hub::new(&config);
        drop(hub);

        let result = handle.leave("alice".into(), SessionId::next()).await;
        assert!(matches!(result, Err(RelayError::HubClosed)));
    }
}
