//! Execution of a single sub-request through a gate.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::backend::{parse_structured_text, GenerationOutput, GenerativeBackend};
use crate::credential::Credential;
use crate::error::ErrorInfo;
use crate::gate::ConcurrencyGate;
use crate::metrics::{DispatchMetrics, ItemTimer};
use crate::request::{PreparedCall, ResultRecord, SubRequest};

/// Upper bound on schema violations quoted in an error message
const MAX_REPORTED_VIOLATIONS: usize = 5;

/// Wraps one backend call: permit in, call, permit out, normalized result.
///
/// `execute` never fails. Every failure, including a timeout, becomes a
/// failed [`ResultRecord`], so sibling items of a batch are unaffected.
pub struct RequestExecutor {
    backend: Arc<dyn GenerativeBackend>,
    call_timeout: Option<Duration>,
    metrics: Arc<DispatchMetrics>,
}

impl RequestExecutor {
    /// Create an executor. `call_timeout` bounds each backend call.
    pub fn new(backend: Arc<dyn GenerativeBackend>, call_timeout: Option<Duration>) -> Self {
        Self { backend, call_timeout, metrics: Arc::new(DispatchMetrics::new()) }
    }

    pub fn metrics(&self) -> &Arc<DispatchMetrics> {
        &self.metrics
    }

    /// Record an item that could not be decoded and return its failure
    pub fn reject(&self, index: usize, error: ErrorInfo) -> ResultRecord {
        self.metrics.record_invalid();
        debug!(index, error = %error, "Rejected undecodable sub-request");
        ResultRecord::failed(index, error)
    }

    /// Run one sub-request against `gate` with `credential`
    #[instrument(
        skip_all,
        fields(index = request.index, kind = request.kind().as_str(), gate = gate.id())
    )]
    pub async fn execute(
        &self,
        request: SubRequest,
        credential: &Credential,
        gate: &ConcurrencyGate,
    ) -> ResultRecord {
        let index = request.index;

        // Malformed items never consume a permit
        let prepared = match request.payload.prepare() {
            Ok(prepared) => prepared,
            Err(error) => {
                self.metrics.record_invalid();
                debug!(error = %error, "Rejected invalid sub-request");
                return ResultRecord::failed(index, error);
            }
        };

        let mut timer = ItemTimer::new();
        self.metrics.record_waiting();
        let mut stage = StageGuard { metrics: &self.metrics, stage: Stage::Waiting };
        debug!(held = gate.held(), capacity = gate.capacity(), "Waiting for gate permit");

        let permit = match gate.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                stage.stage = Stage::Done;
                self.metrics.record_abandoned();
                warn!(error = %e, "Gate refused permit");
                return ResultRecord::failed(index, ErrorInfo::backend(e.to_string()));
            }
        };

        timer.admit();
        self.metrics.record_admitted(timer.gate_wait_time());
        stage.stage = Stage::InFlight;
        debug!(wait_ms = timer.gate_wait_time().as_millis() as u64, "Acquired gate permit");

        let outcome = self.invoke(credential, &prepared).await;
        permit.release();

        stage.stage = Stage::Done;
        self.metrics
            .record_finished(timer.backend_time(), outcome.as_ref().err().map(|e| e.kind));

        match outcome {
            Ok(value) => {
                debug!(backend_ms = timer.backend_time().as_millis() as u64, "Sub-request succeeded");
                ResultRecord::succeeded(index, value)
            }
            Err(error) => {
                warn!(kind = %error.kind, error = %error.message, "Sub-request failed");
                ResultRecord::failed(index, error)
            }
        }
    }

    async fn invoke(&self, credential: &Credential, prepared: &PreparedCall) -> Result<Value, ErrorInfo> {
        let call = self.backend.generate(credential, &prepared.call);

        let output = match self.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(ErrorInfo::timeout(format!(
                        "backend call exceeded {}s",
                        limit.as_secs_f64()
                    )))
                }
            },
            None => call.await,
        }
        .map_err(ErrorInfo::from)?;

        if !prepared.call.is_structured() {
            return Ok(output.into_value());
        }

        let value = match output {
            GenerationOutput::Structured(value) => value,
            GenerationOutput::Text(text) => parse_structured_text(&text).map_err(ErrorInfo::from)?,
        };

        if let Some(validator) = &prepared.validator {
            let violations: Vec<String> = validator
                .iter_errors(&value)
                .take(MAX_REPORTED_VIOLATIONS)
                .map(|e| e.to_string())
                .collect();
            if !violations.is_empty() {
                return Err(ErrorInfo::backend(format!(
                    "output does not conform to json_schema: {}",
                    violations.join("; ")
                )));
            }
        }

        Ok(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Waiting,
    InFlight,
    Done,
}

/// Settles the waiting/in-flight gauges when an item's task is aborted
/// between permit request and completion.
struct StageGuard<'a> {
    metrics: &'a DispatchMetrics,
    stage: Stage,
}

impl Drop for StageGuard<'_> {
    fn drop(&mut self) {
        match self.stage {
            Stage::Waiting => self.metrics.record_cancelled(false),
            Stage::InFlight => self.metrics.record_cancelled(true),
            Stage::Done => {}
        }
    }
}
