//! API types for the gemgate gateway.
//!
//! `api` holds the gateway's own request/response bodies, `gemini` the wire
//! format of the upstream Generative Language API.

pub mod api;
pub mod gemini;
