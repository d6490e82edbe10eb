// gemgate core library
//
// Concurrency gates, credential resolution and batch dispatch for a
// rate-limited generative backend

pub mod backend;
pub mod credential;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod gate;
pub mod metrics;
pub mod request;
pub mod story_schema;

pub use backend::{GenerationCall, GenerationOutput, GenerativeBackend};
pub use credential::{Credential, CredentialRequest, CredentialResolver, CredentialSources, SourceTier};
pub use dispatcher::BatchDispatcher;
pub use error::{BackendError, CredentialError, DispatchError, ErrorInfo, ErrorKind, GateError};
pub use executor::RequestExecutor;
pub use gate::{
    ConcurrencyGate, GatePermit, GateRegistry, GateSnapshot, SharedGate, DEFAULT_GATE_ID,
    MAX_GATE_CAPACITY,
};
pub use metrics::{DispatchMetrics, MetricsSnapshot};
pub use request::{
    BatchOutcome, ChatPayload, CinematicStoryPayload, GenerationPayload, RequestKind, ResultRecord,
    StructuredOutputPayload, SubRequest,
};
