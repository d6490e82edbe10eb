//! Batch dispatch: fan out sub-requests, gather results in input order.

use std::sync::Arc;

use serde_json::Value;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{error, info, instrument, Instrument};
use uuid::Uuid;

use crate::credential::Credential;
use crate::error::{DispatchError, ErrorInfo, GateError};
use crate::executor::RequestExecutor;
use crate::gate::{GateRegistry, DEFAULT_GATE_ID};
use crate::metrics::DispatchMetrics;
use crate::request::{BatchOutcome, GenerationPayload, ResultRecord, SubRequest};

/// A batch position: finished before dispatch, or running on its own task
enum Slot {
    Done(ResultRecord),
    Running(usize, JoinHandle<ResultRecord>),
}

/// Aborts every item task still running when the batch future is dropped
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Runs batches of generation payloads against a gate.
///
/// Every item of a batch gets its own task; the gate alone decides how many
/// run at once. The credential and gate are resolved once per batch and
/// shared by all items.
pub struct BatchDispatcher {
    registry: Arc<GateRegistry>,
    executor: Arc<RequestExecutor>,
}

impl BatchDispatcher {
    pub fn new(registry: Arc<GateRegistry>, executor: Arc<RequestExecutor>) -> Self {
        Self { registry, executor }
    }

    pub fn registry(&self) -> &Arc<GateRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<DispatchMetrics> {
        self.executor.metrics()
    }

    /// Dispatch a batch.
    ///
    /// Fails only when `gate_id` cannot be resolved. Item failures are
    /// reported in the outcome; `results[i]` always answers `payloads[i]`.
    pub async fn dispatch(
        &self,
        payloads: Vec<GenerationPayload>,
        credential: Credential,
        gate_id: Option<&str>,
    ) -> Result<BatchOutcome, GateError> {
        let items = payloads.into_iter().map(Ok).collect();
        self.dispatch_items(items, credential, gate_id).await
    }

    /// Dispatch a batch whose items may already have failed to decode.
    ///
    /// An `Err` item becomes an `InvalidRequest` record at its position
    /// without touching the gate.
    #[instrument(
        skip_all,
        fields(
            batch_id = %Uuid::new_v4(),
            size = items.len(),
            gate = gate_id.unwrap_or(DEFAULT_GATE_ID),
            tier = credential.source_tier().as_str()
        )
    )]
    pub async fn dispatch_items(
        &self,
        items: Vec<Result<GenerationPayload, ErrorInfo>>,
        credential: Credential,
        gate_id: Option<&str>,
    ) -> Result<BatchOutcome, GateError> {
        let gate = self.registry.resolve(gate_id)?;
        self.executor.metrics().record_batch(items.len());

        if items.is_empty() {
            return Ok(BatchOutcome::empty());
        }

        let credential = Arc::new(credential);
        let slots: Vec<Slot> = items
            .into_iter()
            .enumerate()
            .map(|(index, item)| match item {
                Ok(payload) => {
                    let executor = Arc::clone(&self.executor);
                    let gate = Arc::clone(&gate);
                    let credential = Arc::clone(&credential);
                    let request = SubRequest::new(index, payload);

                    let task = async move { executor.execute(request, &credential, &gate).await };
                    Slot::Running(index, tokio::spawn(task.in_current_span()))
                }
                Err(error) => Slot::Done(self.executor.reject(index, error)),
            })
            .collect();

        // A caller that stops waiting stops its items, freeing their permits
        let _abort = AbortOnDrop(
            slots
                .iter()
                .filter_map(|slot| match slot {
                    Slot::Running(_, handle) => Some(handle.abort_handle()),
                    Slot::Done(_) => None,
                })
                .collect(),
        );

        let mut records = Vec::with_capacity(slots.len());
        for slot in slots {
            match slot {
                Slot::Done(record) => records.push(record),
                Slot::Running(index, handle) => match handle.await {
                    Ok(record) => records.push(record),
                    Err(e) => {
                        error!(index, error = %e, "Sub-request task failed");
                        records.push(ResultRecord::failed(
                            index,
                            ErrorInfo::backend(format!("sub-request task failed: {}", e)),
                        ));
                    }
                },
            }
        }

        let outcome = BatchOutcome::from_records(records);
        info!(
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            "Batch complete"
        );
        Ok(outcome)
    }

    /// Dispatch a single payload as a batch of one and unwrap its result
    pub async fn dispatch_one(
        &self,
        payload: GenerationPayload,
        credential: Credential,
        gate_id: Option<&str>,
    ) -> Result<Value, DispatchError> {
        let outcome = self.dispatch(vec![payload], credential, gate_id).await?;

        match outcome.results.into_iter().next() {
            Some(record) => record.into_result().map_err(DispatchError::Item),
            None => Err(DispatchError::Item(ErrorInfo::backend("batch of one produced no result"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{GenerationCall, GenerationOutput, GenerativeBackend};
    use crate::credential::SourceTier;
    use crate::error::{BackendError, ErrorKind};
    use crate::request::ChatPayload;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Echoes the prompt back; prompts starting with "fail" are rejected
    struct EchoBackend;

    #[async_trait]
    impl GenerativeBackend for EchoBackend {
        async fn generate(
            &self,
            _credential: &Credential,
            call: &GenerationCall,
        ) -> Result<GenerationOutput, BackendError> {
            if call.content.starts_with("fail") {
                return Err(BackendError::upstream("model overloaded"));
            }
            Ok(GenerationOutput::Text(call.content.clone()))
        }
    }

    fn dispatcher() -> BatchDispatcher {
        let registry = Arc::new(GateRegistry::new(2, 2).unwrap());
        let executor = Arc::new(RequestExecutor::new(Arc::new(EchoBackend), None));
        BatchDispatcher::new(registry, executor)
    }

    fn chat(prompt: &str) -> GenerationPayload {
        GenerationPayload::Chat(ChatPayload { prompt: Some(prompt.into()), ..Default::default() })
    }

    fn credential() -> Credential {
        Credential::new("k", SourceTier::Environment)
    }

    #[tokio::test]
    async fn test_dispatch_mixed_batch() {
        let dispatcher = dispatcher();
        let payloads = vec![chat("a"), chat("fail b"), GenerationPayload::Chat(ChatPayload::default())];

        let outcome = dispatcher.dispatch(payloads, credential(), None).await.unwrap();

        assert_eq!(outcome.total, 3);
        assert_eq!(outcome.succeeded, 1);
        assert_eq!(outcome.failed, 2);
        assert_eq!(outcome.results[0].value, Some(json!("a")));
        assert_eq!(outcome.results[1].error.as_ref().unwrap().kind, ErrorKind::BackendError);
        assert_eq!(outcome.results[2].error.as_ref().unwrap().kind, ErrorKind::InvalidRequest);
        assert_eq!(dispatcher.registry().default_gate().held(), 0);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let outcome = dispatcher().dispatch(Vec::new(), credential(), None).await.unwrap();
        assert_eq!(outcome, BatchOutcome::empty());
        assert_eq!(outcome.total, 0);
    }

    #[tokio::test]
    async fn test_unknown_gate_is_created() {
        let dispatcher = dispatcher();
        dispatcher.dispatch(vec![chat("x")], credential(), Some("tenant-a")).await.unwrap();
        assert!(dispatcher.registry().snapshot().contains_key("tenant-a"));
    }

    #[tokio::test]
    async fn test_empty_gate_id_rejected() {
        let err = dispatcher().dispatch(vec![chat("x")], credential(), Some("")).await.unwrap_err();
        assert_eq!(err, GateError::EmptyId);
    }

    #[tokio::test]
    async fn test_undecodable_items_fail_in_place() {
        let dispatcher = dispatcher();
        let items = vec![
            Ok(chat("a")),
            Err(ErrorInfo::invalid_request("unknown variant `poem`")),
            Ok(chat("c")),
        ];

        let outcome = dispatcher.dispatch_items(items, credential(), None).await.unwrap();
        assert_eq!(outcome.succeeded, 2);
        assert_eq!(outcome.results[1].index, 1);
        assert_eq!(outcome.results[1].error.as_ref().unwrap().kind, ErrorKind::InvalidRequest);
        assert_eq!(outcome.results[2].value, Some(json!("c")));
        assert_eq!(dispatcher.metrics().snapshot().items_invalid, 1);
    }

    /// Counts calls; each call takes 100ms
    #[derive(Default)]
    struct SlowBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GenerativeBackend for SlowBackend {
        async fn generate(
            &self,
            _credential: &Credential,
            call: &GenerationCall,
        ) -> Result<GenerationOutput, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(GenerationOutput::Text(call.content.clone()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_batch_stops_its_items() {
        let backend = Arc::new(SlowBackend::default());
        let registry = Arc::new(GateRegistry::new(2, 2).unwrap());
        let executor = Arc::new(RequestExecutor::new(backend.clone(), None));
        let dispatcher = BatchDispatcher::new(registry, executor);

        let payloads: Vec<GenerationPayload> = (0..10).map(|i| chat(&i.to_string())).collect();
        let dispatch = dispatcher.dispatch(payloads, credential(), None);
        assert!(tokio::time::timeout(Duration::from_millis(50), dispatch).await.is_err());

        tokio::time::sleep(Duration::from_secs(5)).await;

        // Only the two items admitted before the caller left reached the backend
        assert!(backend.calls.load(Ordering::SeqCst) <= 2);
        assert_eq!(dispatcher.registry().default_gate().held(), 0);

        let snapshot = dispatcher.metrics().snapshot();
        assert_eq!(snapshot.items_in_flight, 0);
        assert_eq!(snapshot.items_waiting, 0);
        assert_eq!(snapshot.items_cancelled, 10);
    }

    #[tokio::test]
    async fn test_dispatch_one() {
        let dispatcher = dispatcher();

        let value = dispatcher.dispatch_one(chat("hello"), credential(), None).await.unwrap();
        assert_eq!(value, json!("hello"));

        let err = dispatcher.dispatch_one(chat("fail"), credential(), None).await.unwrap_err();
        match err {
            DispatchError::Item(info) => assert_eq!(info.kind, ErrorKind::BackendError),
            other => panic!("unexpected error: {:?}", other),
        }

        let snapshot = dispatcher.metrics().snapshot();
        assert_eq!(snapshot.batches_dispatched, 2);
        assert_eq!(snapshot.items_succeeded, 1);
    }
}
