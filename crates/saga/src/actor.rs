//! Per-transaction worker.
//!
//! Each live saga is one tokio task that exclusively owns its [`SagaData`].
//! Messages are handled strictly one at a time: decide, journal, fold,
//! then run effects. Timers and dispatch failures come back through the
//! same mailbox, so nothing here ever blocks on a participant.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::GlobalTxId;
use event_store::{AppendOptions, EventEnvelope, EventStore, EventStoreExt, Snapshot, Version};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::channel::CompensationChannel;
use crate::data::SagaData;
use crate::domain::SagaDomainEvent;
use crate::error::{Result, SagaError};
use crate::events::{EventHeader, SagaEvent};
use crate::machine::{Effect, SagaMessage, SagaStateMachine};
use crate::sink::SagaDataSink;
use crate::state::{SagaState, SuspendedType};
use crate::tx_entity::TxState;

/// Dependencies shared by every saga worker.
pub struct SagaContext {
    pub store: Arc<dyn EventStore>,
    pub channel: Arc<dyn CompensationChannel>,
    pub sink: Arc<dyn SagaDataSink>,
    pub machine: SagaStateMachine,
}

/// Cancellable timers that feed messages back into the mailbox.
///
/// Timers only hold a weak sender, so they never keep a stopped worker's
/// mailbox alive.
struct Timers {
    mailbox: mpsc::WeakUnboundedSender<SagaMessage>,
    deadline: Option<AbortHandle>,
    // One pending timer per sub-transaction: either an ack timeout or a retry.
    entities: HashMap<String, AbortHandle>,
}

impl Timers {
    fn new(mailbox: mpsc::WeakUnboundedSender<SagaMessage>) -> Self {
        Self {
            mailbox,
            deadline: None,
            entities: HashMap::new(),
        }
    }

    fn spawn(&self, delay: Duration, message: SagaMessage) -> AbortHandle {
        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = mailbox.upgrade() {
                let _ = tx.send(message);
            }
        })
        .abort_handle()
    }

    fn arm_deadline(&mut self, at: DateTime<Utc>) {
        let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let handle = self.spawn(delay, SagaMessage::SagaDeadline);
        if let Some(previous) = self.deadline.replace(handle) {
            previous.abort();
        }
    }

    fn arm_entity(&mut self, local_tx_id: &str, delay: Duration, message: SagaMessage) {
        let handle = self.spawn(delay, message);
        if let Some(previous) = self.entities.insert(local_tx_id.to_string(), handle) {
            previous.abort();
        }
    }

    fn cancel_entity(&mut self, local_tx_id: &str) {
        if let Some(handle) = self.entities.remove(local_tx_id) {
            handle.abort();
        }
    }

    fn cancel_all(&mut self) {
        if let Some(handle) = self.deadline.take() {
            handle.abort();
        }
        for (_, handle) in self.entities.drain() {
            handle.abort();
        }
    }
}

/// The worker owning one global transaction.
pub(crate) struct SagaActor {
    data: SagaData,
    version: Version,
    snapshot_version: Version,
    ctx: Arc<SagaContext>,
    mailbox: mpsc::WeakUnboundedSender<SagaMessage>,
    timers: Timers,
}

impl SagaActor {
    pub(crate) fn new(
        global_tx_id: GlobalTxId,
        ctx: Arc<SagaContext>,
        mailbox: mpsc::WeakUnboundedSender<SagaMessage>,
    ) -> Self {
        Self {
            data: SagaData::new(global_tx_id),
            version: Version::initial(),
            snapshot_version: Version::initial(),
            ctx,
            timers: Timers::new(mailbox.clone()),
            mailbox,
        }
    }

    /// Runs the worker until the saga terminates, passivates or the router
    /// drops its sender. Returns the mailbox so unread messages can be
    /// handed to a successor.
    #[tracing::instrument(name = "saga", skip_all, fields(global_tx_id = %self.data.global_tx_id))]
    pub(crate) async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<SagaMessage>,
    ) -> mpsc::UnboundedReceiver<SagaMessage> {
        match self.recover().await {
            Ok(()) => {}
            Err(SagaError::EventStore(e)) => {
                tracing::error!(error = %e, "failed to load saga journal");
                metrics::counter!("saga_persist_failures_total").increment(1);
                rx.close();
                let mut dropped = 0;
                while rx.try_recv().is_ok() {
                    dropped += 1;
                }
                if dropped > 0 {
                    tracing::warn!(dropped, "messages dropped, relying on redelivery");
                }
                return rx;
            }
            Err(e) => self.fatal(e).await,
        }

        if self.data.terminated {
            // Ended before a crash, or the journal could not be folded
            self.publish().await;
            self.finish().await;
            return rx;
        }
        self.rearm();

        let idle_passivate = self.ctx.machine.settings().idle_passivate;
        loop {
            let message = if self.data.last_state == SagaState::Idle {
                match tokio::time::timeout(idle_passivate, rx.recv()).await {
                    Ok(message) => message,
                    Err(_) => {
                        tracing::debug!("idle saga passivated");
                        break;
                    }
                }
            } else {
                rx.recv().await
            };

            let Some(message) = message else {
                break;
            };

            self.handle(message).await;

            if self.data.terminated {
                self.finish().await;
                break;
            }
        }

        self.timers.cancel_all();
        rx
    }

    async fn recover(&mut self) -> Result<()> {
        let global_tx_id = self.data.global_tx_id.clone();
        let (snapshot, events) = self.ctx.store.load_stream(&global_tx_id).await?;

        if let Some(snapshot) = snapshot {
            self.version = snapshot.version;
            self.snapshot_version = snapshot.version;
            self.data = snapshot.into_state()?;
        }

        for envelope in events {
            self.version = envelope.version;
            let event: SagaDomainEvent = envelope.decode()?;
            self.data.apply(&event)?;
        }

        if self.version > Version::initial() {
            tracing::info!(
                version = %self.version,
                state = %self.data.last_state,
                "saga recovered"
            );
        }
        Ok(())
    }

    /// Re-arms timers lost with the previous worker. Compensation is never
    /// re-sent here; only the timers that would have fed the machine.
    fn rearm(&mut self) {
        if let Some(at) = self.data.expiration_time
            && self.data.last_state.can_time_out()
        {
            self.timers.arm_deadline(at);
        }

        if self.data.last_state != SagaState::Failed {
            return;
        }

        let mut pending = Vec::new();
        for tx in &self.data.tx_entities {
            if tx.state == TxState::CompensationSent && tx.reverse_timeout_seconds > 0 {
                pending.push((
                    tx.local_tx_id.clone(),
                    Duration::from_secs(tx.reverse_timeout_seconds as u64),
                    SagaMessage::AckTimeout {
                        local_tx_id: tx.local_tx_id.clone(),
                        attempt: tx.retries_attempted,
                    },
                ));
            } else if tx.awaiting_retry() {
                pending.push((
                    tx.local_tx_id.clone(),
                    Duration::from_millis(tx.retry_delay_millis),
                    SagaMessage::RetryDue {
                        local_tx_id: tx.local_tx_id.clone(),
                        attempt: tx.retries_attempted + 1,
                    },
                ));
            }
        }
        for (local_tx_id, delay, message) in pending {
            self.timers.arm_entity(&local_tx_id, delay, message);
        }
    }

    async fn handle(&mut self, message: SagaMessage) {
        let decision = match self.ctx.machine.decide(&self.data, &message, Utc::now()) {
            Ok(decision) => decision,
            Err(e) => return self.fatal(e).await,
        };

        if decision.is_empty() {
            return;
        }

        if let Err(e) = self.persist(&decision.events).await {
            tracing::error!(error = %e, "failed to journal saga events, message dropped");
            metrics::counter!("saga_persist_failures_total").increment(1);
            return;
        }

        for event in &decision.events {
            if let Err(e) = self.data.apply(event) {
                return self.fatal(e).await;
            }
            self.observe(event);
        }

        self.publish().await;
        self.maybe_snapshot().await;

        for effect in decision.effects {
            self.execute(effect).await;
        }
    }

    async fn persist(&mut self, events: &[SagaDomainEvent]) -> Result<()> {
        let mut version = self.version;
        let envelopes = events
            .iter()
            .map(|event| -> Result<EventEnvelope> {
                version = version.next();
                Ok(EventEnvelope::builder()
                    .stream_id(self.data.global_tx_id.clone())
                    .event_type(event.event_type())
                    .version(version)
                    .payload(event)?
                    .build()?)
            })
            .collect::<Result<Vec<_>>>()?;

        self.version = self
            .ctx
            .store
            .append(envelopes, AppendOptions::expect_version(self.version))
            .await?;
        Ok(())
    }

    fn observe(&mut self, event: &SagaDomainEvent) {
        match event {
            SagaDomainEvent::SagaStarted { timeout_seconds, .. } => {
                metrics::counter!("saga_started_total").increment(1);
                tracing::info!(timeout_seconds, "saga started");
            }
            SagaDomainEvent::Transitioned { to } => {
                tracing::debug!(state = %to, "saga transitioned");
            }
            SagaDomainEvent::CompensationSucceeded { local_tx_id }
            | SagaDomainEvent::CompensationFailed { local_tx_id, .. } => {
                self.timers.cancel_entity(local_tx_id);
            }
            _ => {}
        }
    }

    async fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::Compensate {
                target,
                command,
                attempt,
                ack_timeout,
            } => {
                metrics::counter!("compensation_dispatched_total").increment(1);
                if attempt > 0 {
                    metrics::counter!("compensation_retries_total").increment(1);
                }

                let local_tx_id = command.local_tx_id.clone();
                match self.ctx.channel.dispatch(&target, command).await {
                    Ok(()) => {
                        tracing::info!(%local_tx_id, %target, attempt, "compensation dispatched");
                        if let Some(after) = ack_timeout {
                            let message = SagaMessage::AckTimeout {
                                local_tx_id: local_tx_id.clone(),
                                attempt,
                            };
                            self.timers.arm_entity(&local_tx_id, after, message);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(%local_tx_id, %target, error = %e, "compensation not delivered");
                        let header = EventHeader {
                            global_tx_id: self.data.global_tx_id.clone(),
                            service_name: target.service_name,
                            instance_id: target.instance_id,
                            create_time: Utc::now(),
                        };
                        self.tell_self(SagaMessage::Event(SagaEvent::compensate_ack_timeout(
                            header,
                            local_tx_id,
                            e.to_string().into_bytes(),
                        )));
                    }
                }
            }
            Effect::ScheduleRetry {
                local_tx_id,
                attempt,
                delay,
            } => {
                tracing::debug!(%local_tx_id, attempt, ?delay, "compensation retry scheduled");
                let message = SagaMessage::RetryDue {
                    local_tx_id: local_tx_id.clone(),
                    attempt,
                };
                self.timers.arm_entity(&local_tx_id, delay, message);
            }
            Effect::ArmSagaDeadline { at } => self.timers.arm_deadline(at),
        }
    }

    fn tell_self(&self, message: SagaMessage) {
        if let Some(tx) = self.mailbox.upgrade() {
            let _ = tx.send(message);
        }
    }

    async fn publish(&self) {
        if let Err(e) = self.ctx.sink.put(&self.data).await {
            tracing::warn!(error = %e, "failed to publish saga data");
        }
    }

    async fn maybe_snapshot(&mut self) {
        let interval = self.ctx.machine.settings().snapshot_interval;
        if interval <= 0
            || self.data.terminated
            || self.version.as_i64() - self.snapshot_version.as_i64() < interval
        {
            return;
        }

        let snapshot =
            match Snapshot::from_state(self.data.global_tx_id.clone(), self.version, &self.data) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to serialize saga snapshot");
                    return;
                }
            };

        match self.ctx.store.save_snapshot(snapshot).await {
            Ok(()) => {
                self.snapshot_version = self.version;
                tracing::debug!(version = %self.version, "saga snapshot saved");
            }
            Err(e) => tracing::warn!(error = %e, "failed to save saga snapshot"),
        }
    }

    /// Forces the saga into SUSPENDED after its data could not be folded.
    async fn fatal(&mut self, error: SagaError) {
        tracing::error!(error = %error, "saga data inconsistent, suspending");
        metrics::counter!("saga_fatal_total").increment(1);

        if self.data.terminated {
            return;
        }

        let suspended_type = match self.data.suspended_type {
            SuspendedType::None => SuspendedType::Unpredictable,
            other => other,
        };
        let end_time = Utc::now();
        let ended = SagaDomainEvent::SagaEnded {
            state: SagaState::Suspended,
            suspended_type,
            end_time,
        };
        if let Err(e) = self.persist(std::slice::from_ref(&ended)).await {
            tracing::warn!(error = %e, "failed to journal forced suspension");
        }

        self.data.last_state = SagaState::Suspended;
        self.data.suspended_type = suspended_type;
        self.data.end_time = Some(end_time);
        self.data.terminated = true;
        self.publish().await;
    }

    /// Termination side effects, run exactly once per terminal saga.
    async fn finish(&mut self) {
        self.timers.cancel_all();

        let state = self.data.last_state;
        metrics::counter!("saga_terminated_total", "state" => state.as_str()).increment(1);
        if let Some(duration) = self.data.duration() {
            metrics::histogram!("saga_duration_seconds")
                .record(duration.num_milliseconds() as f64 / 1000.0);
        }
        tracing::info!(
            %state,
            suspended_type = ?self.data.suspended_type,
            "saga terminated"
        );

        if let Err(e) = self.ctx.sink.stop(&self.data.global_tx_id).await {
            tracing::warn!(error = %e, "failed to stop saga data sink");
        }
        if let Err(e) = self.ctx.store.purge(&self.data.global_tx_id).await {
            tracing::error!(error = %e, "failed to purge saga journal");
        }
    }
}
