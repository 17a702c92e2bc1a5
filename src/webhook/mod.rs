//! Admission webhooks
//!
//! Defaulting and validation for every topology kind, served over HTTPS
//! to the Kubernetes API server.

pub mod mutation;
pub mod server;
pub mod validation;

pub use mutation::{apply_defaults, mutate, Mutation};
pub use server::{TlsConfig, WebhookServer};
pub use validation::{review, Admissible, Verdict};
