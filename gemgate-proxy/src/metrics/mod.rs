//! Metrics module for the gemgate gateway
//!
//! Provides Prometheus metrics for monitoring and observability.

pub mod prometheus;

// Re-export commonly used items
pub use self::prometheus::{
    encode_metrics, record_auth_failure, record_batch_size, record_item, record_status,
    register_metrics, set_gate_gauges, set_item_gauges, RequestTimer,
};
