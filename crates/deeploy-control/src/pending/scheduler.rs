//! Cooperative polling of chainstore confirmations.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use deeploy_state::KvBackend;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::envelope::Envelope;
use crate::error::{ControlError, ControlResult};
use crate::ledger::Ledger;
use crate::state::{Dispatching, Operation};
use crate::types::{DeeployStatus, PendingId};

use super::{submit_node_update, ConfirmContext, PendingKind, PendingRequest, PendingRequestStore};

/// A dispatched operation handed to the scheduler.
#[derive(Debug)]
pub struct Dispatched {
    pub kind: PendingKind,
    pub operation: Operation<Dispatching>,
    /// Confirmation keys per node; empty for unconfirmable jobs.
    pub response_keys: BTreeMap<String, Vec<String>>,
    pub base_result: Envelope,
    pub confirm: ConfirmContext,
}

/// Result of one scheduling step.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Final envelope.
    Ready(Envelope),
    /// Not done; poll again with this id.
    Postponed(PendingId),
}

/// Advances pending requests one non-blocking step at a time.
#[derive(Clone)]
pub struct PostponedRequestScheduler {
    store: Arc<dyn PendingRequestStore>,
    kv: Arc<dyn KvBackend>,
    ledger: Arc<dyn Ledger>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    timeout: Duration,
}

impl std::fmt::Debug for PostponedRequestScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostponedRequestScheduler")
            .field("poll_interval", &self.poll_interval)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl PostponedRequestScheduler {
    #[must_use]
    pub fn new(
        store: Arc<dyn PendingRequestStore>,
        kv: Arc<dyn KvBackend>,
        ledger: Arc<dyn Ledger>,
        clock: Arc<dyn Clock>,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            kv,
            ledger,
            clock,
            poll_interval,
            timeout,
        }
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Number of requests still waiting.
    pub async fn pending_count(&self) -> ControlResult<usize> {
        self.store.len().await
    }

    /// Hand over a dispatched operation.
    ///
    /// Unconfirmable operations finish right away as `command_delivered`.
    pub async fn submit(&self, dispatched: Dispatched) -> ControlResult<Outcome> {
        let total: usize = dispatched.response_keys.values().map(Vec::len).sum();

        if total == 0 {
            let operation = dispatched.operation.deliver();
            submit_node_update(self.ledger.as_ref(), &dispatched.confirm).await;
            info!(
                kind = %dispatched.kind,
                app_id = ?operation.data().app_id,
                job_id = ?operation.data().job_id,
                phase = %operation.phase(),
                "commands delivered"
            );
            return Ok(Outcome::Ready(
                dispatched.base_result.finish(DeeployStatus::CommandDelivered),
            ));
        }

        let operation = dispatched.operation.await_confirmation();
        let now = self.clock.now();
        let pending_id = PendingId::generate();
        let request = PendingRequest {
            pending_id: pending_id.clone(),
            kind: dispatched.kind,
            phase: operation.phase(),
            operation: operation.into_data(),
            response_keys: dispatched.response_keys,
            collected: BTreeMap::new(),
            start_time: now,
            timeout: self.timeout,
            next_check_ts: now,
            base_result: dispatched.base_result,
            confirm: dispatched.confirm,
        };
        self.store.insert(request).await?;

        info!(%pending_id, keys = total, "awaiting confirmations");
        Ok(Outcome::Postponed(pending_id))
    }

    /// One step for one request.
    pub async fn solve(&self, pending_id: &PendingId) -> ControlResult<Outcome> {
        let Some(mut request) = self.store.get(pending_id).await? else {
            let err = ControlError::request(format!("pending request {pending_id} not found"));
            return Ok(Outcome::Ready(Envelope::failure(&err, Value::Null, 0)));
        };

        let now = self.clock.now();
        if request.is_expired(now) {
            self.store.remove(pending_id).await?;
            return Ok(Outcome::Ready(Self::timed_out(request)));
        }

        if now < request.next_check_ts {
            return Ok(Outcome::Postponed(pending_id.clone()));
        }

        for key in request.pending_keys() {
            match self.kv.get(&key).await {
                Ok(Some(bytes)) => {
                    let value = serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                        Value::String(String::from_utf8_lossy(&bytes).into_owned())
                    });
                    if !value.is_null() {
                        debug!(%pending_id, key, "confirmation received");
                        request.collected.insert(key, value);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(%pending_id, key, error = %e, "chainstore read failed"),
            }
        }

        if request.is_complete() {
            self.store.remove(pending_id).await?;
            return Ok(Outcome::Ready(self.confirmed(request).await));
        }

        request.next_check_ts = now
            + chrono::Duration::from_std(self.poll_interval).unwrap_or_else(|_| chrono::Duration::zero());
        self.store.update(request).await?;
        Ok(Outcome::Postponed(pending_id.clone()))
    }

    /// Reap requests nobody polls any more.
    ///
    /// A request is handled by the caller that submitted it; only the ones
    /// left past twice their timeout are finished here.
    pub async fn sweep(&self) -> ControlResult<Vec<(PendingId, Envelope)>> {
        let now = self.clock.now();
        let mut reaped = Vec::new();
        for id in self.store.ids().await? {
            let Some(request) = self.store.get(&id).await? else {
                continue;
            };
            if !request.is_abandoned(now) {
                continue;
            }
            self.store.remove(&id).await?;
            reaped.push((id, Self::timed_out(request)));
        }
        Ok(reaped)
    }

    async fn confirmed(&self, mut request: PendingRequest) -> Envelope {
        request.confirm.submitted =
            submit_node_update(self.ledger.as_ref(), &request.confirm).await;
        let operation = Operation::resume(request.operation).confirm();
        info!(
            pending_id = %request.pending_id,
            app_id = ?operation.data().app_id,
            job_id = ?operation.data().job_id,
            phase = %operation.phase(),
            "deployment confirmed"
        );

        let details: Map<String, Value> = request.collected.into_iter().collect();
        request
            .base_result
            .finish(DeeployStatus::Success)
            .with_details(Value::Object(details))
    }

    fn timed_out(request: PendingRequest) -> Envelope {
        let pending_keys = request.pending_keys();
        let operation = Operation::resume(request.operation).time_out();
        warn!(
            pending_id = %request.pending_id,
            app_id = ?operation.data().app_id,
            job_id = ?operation.data().job_id,
            missing = pending_keys.len(),
            phase = %operation.phase(),
            "confirmations timed out"
        );

        let mut details: Map<String, Value> = request.collected.into_iter().collect();
        details.insert(
            "pending_keys".to_owned(),
            Value::Array(pending_keys.into_iter().map(Value::String).collect()),
        );

        let base = match request.kind {
            PendingKind::ScaleUp => request.base_result,
            PendingKind::Pipeline => {
                let mut env = Envelope::new(DeeployStatus::Timeout, Value::Null)
                    .with_job_id(request.base_result.job_id);
                if let Some(app_id) = request.base_result.app_id {
                    env = env.with_app_id(app_id);
                }
                env
            }
        };
        base.finish(DeeployStatus::Timeout)
            .with_details(Value::Object(details))
    }
}
