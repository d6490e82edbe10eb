// Admission control and dispatch behaviour across gates, credentials and backends

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gemgate_core::{
    BackendError, BatchDispatcher, BatchOutcome, ChatPayload, Credential, CredentialError,
    CredentialRequest, CredentialResolver, CredentialSources, ErrorKind, GateRegistry,
    GenerationCall, GenerationOutput, GenerationPayload, GenerativeBackend, RequestExecutor,
    SourceTier,
};
use serde_json::json;

/// Sleeps per call and records the peak number of concurrent calls.
///
/// Prompts of the form `"sleep:<ms>"` override the default delay and
/// prompts starting with `"fail"` produce a backend error.
struct CountingBackend {
    delay: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
    keys: Mutex<Vec<String>>,
}

impl CountingBackend {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            keys: Mutex::new(Vec::new()),
        })
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerativeBackend for CountingBackend {
    async fn generate(
        &self,
        credential: &Credential,
        call: &GenerationCall,
    ) -> Result<GenerationOutput, BackendError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.keys.lock().unwrap().push(credential.api_key().to_string());

        let delay = call
            .content
            .strip_prefix("sleep:")
            .and_then(|ms| ms.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(self.delay);
        tokio::time::sleep(delay).await;

        self.active.fetch_sub(1, Ordering::SeqCst);

        if call.content.starts_with("fail") {
            return Err(BackendError::upstream("quota exceeded"));
        }
        Ok(GenerationOutput::Text(format!("echo:{}", call.content)))
    }
}

fn dispatcher(backend: Arc<CountingBackend>, default_capacity: usize) -> BatchDispatcher {
    let registry = Arc::new(GateRegistry::new(default_capacity, default_capacity).unwrap());
    let executor = Arc::new(RequestExecutor::new(backend, Some(Duration::from_secs(30))));
    BatchDispatcher::new(registry, executor)
}

fn chat(prompt: impl Into<String>) -> GenerationPayload {
    GenerationPayload::Chat(ChatPayload { prompt: Some(prompt.into()), ..Default::default() })
}

fn user_credential() -> Credential {
    Credential::new("user-key", SourceTier::User)
}

#[tokio::test(start_paused = true)]
async fn test_gate_bounds_in_flight_calls() {
    let backend = CountingBackend::new(Duration::from_millis(100));
    let dispatcher = dispatcher(backend.clone(), 3);

    let payloads = (0..20).map(|i| chat(format!("item {}", i))).collect();
    let outcome = dispatcher.dispatch(payloads, user_credential(), None).await.unwrap();

    assert_eq!(outcome.succeeded, 20);
    assert_eq!(backend.peak(), 3);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 20);
}

#[tokio::test(start_paused = true)]
async fn test_failures_do_not_leak_permits() {
    let backend = CountingBackend::new(Duration::from_millis(10));
    let dispatcher = dispatcher(backend.clone(), 1);

    let payloads = (0..8).map(|i| chat(format!("fail {}", i))).collect();
    let outcome = dispatcher.dispatch(payloads, user_credential(), None).await.unwrap();
    assert_eq!(outcome.failed, 8);

    // Capacity 1: the failing calls ran one at a time
    assert_eq!(backend.peak(), 1);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 8);

    let gate = dispatcher.registry().default_gate();
    assert_eq!(gate.held(), 0);
    assert!(gate.try_acquire().is_some());

    // The gate still admits work after a run of failures
    let value = dispatcher.dispatch_one(chat("after"), user_credential(), None).await.unwrap();
    assert_eq!(value, json!("echo:after"));
}

#[tokio::test(start_paused = true)]
async fn test_results_follow_input_order() {
    let backend = CountingBackend::new(Duration::from_millis(1));
    let dispatcher = dispatcher(backend, 4);

    let payloads = vec![chat("sleep:500"), chat("sleep:10"), chat("sleep:200"), chat("sleep:1")];
    let outcome = dispatcher.dispatch(payloads, user_credential(), None).await.unwrap();

    let values: Vec<_> = outcome.results.iter().map(|r| r.value.clone().unwrap()).collect();
    assert_eq!(
        values,
        vec![json!("echo:sleep:500"), json!("echo:sleep:10"), json!("echo:sleep:200"), json!("echo:sleep:1")]
    );
    for (i, record) in outcome.results.iter().enumerate() {
        assert_eq!(record.index, i);
    }
}

#[tokio::test(start_paused = true)]
async fn test_partial_failure_is_isolated() {
    let backend = CountingBackend::new(Duration::from_millis(5));
    let dispatcher = dispatcher(backend.clone(), 2);

    let payloads = vec![
        chat("first"),
        chat("fail second"),
        GenerationPayload::Chat(ChatPayload::default()),
        chat("fourth"),
    ];
    let outcome = dispatcher.dispatch(payloads, user_credential(), None).await.unwrap();

    assert_eq!(outcome.total, 4);
    assert_eq!(outcome.succeeded, 2);
    assert_eq!(outcome.failed, 2);
    assert!(outcome.results[0].success);
    assert_eq!(outcome.results[1].error.as_ref().unwrap().kind, ErrorKind::BackendError);
    assert_eq!(outcome.results[2].error.as_ref().unwrap().kind, ErrorKind::InvalidRequest);
    assert!(outcome.results[3].success);

    // The invalid item never reached the backend
    assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_resolved_credential_reaches_backend() {
    let backend = CountingBackend::new(Duration::from_millis(1));
    let dispatcher = dispatcher(backend.clone(), 2);
    let resolver = CredentialResolver::new(CredentialSources {
        admin_key: Some("admin-secret".into()),
        server_key: Some("server-key".into()),
        env_key: Some("env-key".into()),
    });

    let cases = [
        (CredentialRequest::new(Some("admin-secret"), Some("user-key")), "server-key"),
        (CredentialRequest::new(Some("wrong"), Some("user-key")), "user-key"),
        (CredentialRequest::new(None, None), "env-key"),
    ];

    for (request, _) in &cases {
        let credential = resolver.resolve(request).unwrap();
        dispatcher.dispatch(vec![chat("hi"), chat("again")], credential, None).await.unwrap();
    }

    let keys = backend.keys.lock().unwrap().clone();
    let expected: Vec<String> = cases
        .iter()
        .flat_map(|(_, key)| [key.to_string(), key.to_string()])
        .collect();
    assert_eq!(keys, expected);
}

#[tokio::test(start_paused = true)]
async fn test_named_gate_is_shared_across_batches() {
    let backend = CountingBackend::new(Duration::from_millis(50));
    let dispatcher = dispatcher(backend.clone(), 10);
    dispatcher.registry().register("shared", 2).unwrap();

    let first = (0..5).map(|i| chat(format!("a{}", i))).collect();
    let second = (0..5).map(|i| chat(format!("b{}", i))).collect();

    let (a, b) = tokio::join!(
        dispatcher.dispatch(first, user_credential(), Some("shared")),
        dispatcher.dispatch(second, user_credential(), Some("shared")),
    );

    assert_eq!(a.unwrap().succeeded, 5);
    assert_eq!(b.unwrap().succeeded, 5);
    assert_eq!(backend.peak(), 2);
    assert_eq!(dispatcher.registry().resolve(Some("shared")).unwrap().held(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_gates_are_independent() {
    let backend = CountingBackend::new(Duration::from_millis(50));
    let dispatcher = dispatcher(backend.clone(), 1);
    dispatcher.registry().register("wide", 4).unwrap();

    let narrow = (0..4).map(|i| chat(format!("n{}", i))).collect();
    let wide = (0..4).map(|i| chat(format!("w{}", i))).collect();

    let (a, b) = tokio::join!(
        dispatcher.dispatch(narrow, user_credential(), None),
        dispatcher.dispatch(wide, user_credential(), Some("wide")),
    );
    assert_eq!(a.unwrap().succeeded + b.unwrap().succeeded, 8);

    // One call on the default gate plus four on the wide gate
    assert_eq!(backend.peak(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_slow_call_times_out_without_blocking_gate() {
    let backend = CountingBackend::new(Duration::from_millis(1));
    let registry = Arc::new(GateRegistry::new(1, 1).unwrap());
    let executor = Arc::new(RequestExecutor::new(backend, Some(Duration::from_secs(2))));
    let dispatcher = BatchDispatcher::new(registry, executor);

    let payloads = vec![chat("sleep:60000"), chat("quick")];
    let outcome = dispatcher.dispatch(payloads, user_credential(), None).await.unwrap();

    assert_eq!(outcome.results[0].error.as_ref().unwrap().kind, ErrorKind::Timeout);
    assert_eq!(outcome.results[1].value, Some(json!("echo:quick")));
    assert_eq!(dispatcher.metrics().snapshot().items_timed_out, 1);
}

/// Resolve first; dispatch only with a credential
async fn resolve_and_dispatch(
    resolver: &CredentialResolver,
    request: CredentialRequest<'_>,
    dispatcher: &BatchDispatcher,
    payloads: Vec<GenerationPayload>,
) -> Result<BatchOutcome, CredentialError> {
    let credential = resolver.resolve(&request)?;
    Ok(dispatcher.dispatch(payloads, credential, None).await.unwrap())
}

#[tokio::test]
async fn test_unresolved_credential_never_reaches_backend() {
    let backend = CountingBackend::new(Duration::from_millis(1));
    let dispatcher = dispatcher(backend.clone(), 2);
    let resolver = CredentialResolver::new(CredentialSources::default());

    let err = resolve_and_dispatch(
        &resolver,
        CredentialRequest::new(Some("guess"), Some("")),
        &dispatcher,
        vec![chat("a"), chat("b")],
    )
    .await
    .unwrap_err();
    assert_eq!(err, CredentialError::Unauthorized);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    assert_eq!(dispatcher.metrics().snapshot().batches_dispatched, 0);

    let outcome = resolve_and_dispatch(
        &resolver,
        CredentialRequest::new(None, Some("user-key")),
        &dispatcher,
        vec![chat("a")],
    )
    .await
    .unwrap();
    assert_eq!(outcome.succeeded, 1);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    assert_eq!(backend.keys.lock().unwrap().as_slice(), ["user-key"]);
}
