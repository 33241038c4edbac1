// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0
//
// ConfigLoader reads a YAML file once and exposes cached accessors for the
// tracing, runtime and client sections. Unknown top-level keys are rejected.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use duration_str::deserialize_option_duration;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use serde_yaml::{Value, from_str};
use tether_pubsub::{CallbackContext, MessageCallback, PubSubMessage};
use tether_tracing::TracingConfiguration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::runtime::RuntimeConfiguration;

#[derive(Error, Debug)]
pub enum ConfigError {
    // File / I/O
    #[error("not found: {0}")]
    NotFound(String),

    // Parsing / structural validity
    #[error("invalid configuration - impossible to parse yaml")]
    InvalidYaml,
    #[error("invalid configuration - key {0} not valid")]
    InvalidKey(String),
    #[error("invalid configuration - missing client")]
    MissingClient,
    #[error("invalid configuration: {0}")]
    Invalid(String),

    // YAML decoding
    #[error("yaml parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

lazy_static! {
    static ref CONFIG_KEYS: HashSet<&'static str> = {
        let mut s = HashSet::new();
        s.insert("tracing");
        s.insert("runtime");
        s.insert("client");
        s
    };
}

/// Channels and patterns a client subscribes to when it connects.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct PubSubSubscriptions {
    #[serde(default)]
    pub channels: Vec<String>,

    #[serde(default)]
    pub patterns: Vec<String>,

    #[serde(default)]
    pub sharded_channels: Vec<String>,
}

impl PubSubSubscriptions {
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty() && self.patterns.is_empty() && self.sharded_channels.is_empty()
    }
}

#[derive(Clone, Deserialize, Default)]
pub struct ClientConfiguration {
    /// endpoints of the native engine, `host:port`
    #[serde(default)]
    addresses: Vec<String>,

    #[serde(default)]
    client_name: Option<String>,

    /// optional upper bound for a single call
    #[serde(default, deserialize_with = "deserialize_option_duration")]
    request_timeout: Option<Duration>,

    #[serde(default)]
    subscriptions: Option<PubSubSubscriptions>,

    #[serde(skip)]
    callback: Option<MessageCallback>,

    #[serde(skip)]
    context: Option<CallbackContext>,
}

impl std::fmt::Debug for ClientConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfiguration")
            .field("addresses", &self.addresses)
            .field("client_name", &self.client_name)
            .field("request_timeout", &self.request_timeout)
            .field("subscriptions", &self.subscriptions)
            .field("callback", &self.callback.is_some())
            .field("context", &self.context.is_some())
            .finish()
    }
}

impl ClientConfiguration {
    pub fn new() -> Self {
        ClientConfiguration::default()
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.addresses.push(address.into());
        self
    }

    pub fn with_client_name(self, client_name: impl Into<String>) -> Self {
        ClientConfiguration {
            client_name: Some(client_name.into()),
            ..self
        }
    }

    pub fn with_request_timeout(self, request_timeout: Duration) -> Self {
        ClientConfiguration {
            request_timeout: Some(request_timeout),
            ..self
        }
    }

    pub fn with_subscriptions(self, subscriptions: PubSubSubscriptions) -> Self {
        ClientConfiguration {
            subscriptions: Some(subscriptions),
            ..self
        }
    }

    /// Delivers pub/sub messages to `callback` instead of a queue.
    pub fn with_callback<F>(self, callback: F, context: Option<CallbackContext>) -> Self
    where
        F: Fn(PubSubMessage, Option<&CallbackContext>) + Send + Sync + 'static,
    {
        ClientConfiguration {
            callback: Some(Arc::new(callback)),
            context,
            ..self
        }
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    pub fn client_name(&self) -> Option<&str> {
        self.client_name.as_deref()
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    pub fn subscriptions(&self) -> Option<&PubSubSubscriptions> {
        self.subscriptions.as_ref()
    }

    pub fn callback(&self) -> Option<&MessageCallback> {
        self.callback.as_ref()
    }

    pub fn context(&self) -> Option<&CallbackContext> {
        self.context.as_ref()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.addresses.is_empty() {
            return Err(ConfigError::Invalid("no address configured".to_string()));
        }
        if let Some(address) = self.addresses.iter().find(|a| a.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("invalid address {:?}", address)));
        }
        if self.request_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::Invalid(
                "request timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// What the native engine receives when a connection is created.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionRequest {
    pub addresses: Vec<String>,
    pub client_name: Option<String>,
    pub request_timeout: Option<Duration>,
    pub subscriptions: Option<PubSubSubscriptions>,
}

impl From<&ClientConfiguration> for ConnectionRequest {
    fn from(config: &ClientConfiguration) -> Self {
        ConnectionRequest {
            addresses: config.addresses.clone(),
            client_name: config.client_name.clone(),
            request_timeout: config.request_timeout,
            subscriptions: config.subscriptions.clone().filter(|s| !s.is_empty()),
        }
    }
}

pub struct ConfigLoader {
    root: Value,
    tracing: Option<TracingConfiguration>,
    runtime: Option<RuntimeConfiguration>,
}

impl std::fmt::Debug for ConfigLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let root_keys = self
            .root
            .as_mapping()
            .map(|m| {
                m.keys()
                    .filter_map(|k| k.as_str())
                    .map(|s| s.to_string())
                    .collect::<Vec<String>>()
            })
            .unwrap_or_default();

        f.debug_struct("ConfigLoader")
            .field("root_keys", &root_keys)
            .field("tracing_loaded", &self.tracing.is_some())
            .field("runtime_loaded", &self.runtime.is_some())
            .finish()
    }
}

impl ConfigLoader {
    pub fn new(file_path: &str) -> Result<Self, ConfigError> {
        let config_str =
            std::fs::read_to_string(file_path).map_err(|e| ConfigError::NotFound(e.to_string()))?;
        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(config_str: &str) -> Result<Self, ConfigError> {
        let root: Value = from_str(config_str).map_err(|_| ConfigError::InvalidYaml)?;

        let mapping = root.as_mapping().ok_or(ConfigError::InvalidYaml)?;
        for key in mapping.keys() {
            let k = key.as_str().ok_or(ConfigError::InvalidYaml)?;
            if !CONFIG_KEYS.contains(k) {
                return Err(ConfigError::InvalidKey(k.to_string()));
            }
        }

        Ok(Self {
            root,
            tracing: None,
            runtime: None,
        })
    }

    pub fn tracing(&mut self) -> &TracingConfiguration {
        self.tracing.get_or_insert_with(|| {
            let cfg = self
                .root
                .get("tracing")
                .cloned()
                .map(|v| {
                    serde_yaml::from_value(v).unwrap_or_else(|e| {
                        warn!(error = ?e, "invalid tracing config, falling back to default");
                        TracingConfiguration::default()
                    })
                })
                .unwrap_or_default();
            debug!(?cfg, "tracing configuration loaded");
            cfg
        })
    }

    pub fn runtime(&mut self) -> &RuntimeConfiguration {
        self.runtime.get_or_insert_with(|| {
            let cfg = self
                .root
                .get("runtime")
                .cloned()
                .map(|v| {
                    serde_yaml::from_value(v).unwrap_or_else(|e| {
                        warn!(error = ?e, "invalid runtime config, falling back to default");
                        RuntimeConfiguration::default()
                    })
                })
                .unwrap_or_default();
            debug!(?cfg, "runtime configuration loaded");
            cfg
        })
    }

    /// The client section, validated. Callbacks are attached afterwards
    /// with [`ClientConfiguration::with_callback`].
    pub fn client(&self) -> Result<ClientConfiguration, ConfigError> {
        let value = self
            .root
            .get("client")
            .cloned()
            .ok_or(ConfigError::MissingClient)?;
        let config: ClientConfiguration = serde_yaml::from_value(value)?;
        config.validate()?;
        debug!(?config, "client configuration loaded");
        Ok(config)
    }
}
