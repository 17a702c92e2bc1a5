//! Credentials for the RabbitMQ management API

use std::fmt;

use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;

use crate::error::{Error, Result};

/// Username/password pair used to authenticate against a cluster.
pub trait CredentialsProvider: Send + Sync + fmt::Debug {
    fn get_user(&self) -> &str;
    fn get_password(&self) -> &str;
}

/// Read a string value from a secret's `data` (or `stringData`).
pub fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    if let Some(value) = secret.data.as_ref().and_then(|d| d.get(key)) {
        return String::from_utf8(value.0.clone()).ok();
    }
    secret
        .string_data
        .as_ref()
        .and_then(|d| d.get(key))
        .cloned()
}

/// Like [`secret_value`] but reports a missing or empty key as a malformed
/// secret.
pub fn required_secret_value(secret: &Secret, key: &str) -> Result<String> {
    secret_value(secret, key)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::MalformedSecret {
            name: format!("{}/{}", secret.namespace().unwrap_or_default(), secret.name_any()),
            message: format!("missing key {key}"),
        })
}

/// Credentials read from a Kubernetes secret
#[derive(Clone)]
pub struct SecretCredentials {
    username: String,
    password: String,
}

impl SecretCredentials {
    pub fn from_secret(secret: &Secret, username_key: &str, password_key: &str) -> Result<Self> {
        Ok(Self {
            username: required_secret_value(secret, username_key)?,
            password: required_secret_value(secret, password_key)?,
        })
    }
}

impl CredentialsProvider for SecretCredentials {
    fn get_user(&self) -> &str {
        &self.username
    }

    fn get_password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for SecretCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Fixed credentials, used for tests and local development
#[derive(Clone)]
pub struct StaticCredentials {
    username: String,
    password: String,
}

impl StaticCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl CredentialsProvider for StaticCredentials {
    fn get_user(&self) -> &str {
        &self.username
    }

    fn get_password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
