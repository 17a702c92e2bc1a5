//! rabbitmq-topology-operator: keeps RabbitMQ queues, exchanges, bindings,
//! users, policies and related objects in sync with Kubernetes custom
//! resources.

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod rabbitmq;
pub mod telemetry;

#[cfg(feature = "admission-webhook")]
pub mod webhook;

pub use crate::error::{Error, Result};
