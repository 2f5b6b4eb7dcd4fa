// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Namespace configuration
//!
//! Every field has a default, so an empty document is a valid configuration.
//! Durations are written as human strings ("250ms", "5s", "2 minutes").
//!
//! ```yaml
//! invite_retry:
//!   max_times: 8
//!   min_delay: 200ms
//!   max_delay: 30s
//! pending_expiry: 10m
//! ```

use crate::error::Result;
use backon::ExponentialBuilder;
use serde::{Deserialize, Deserializer};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NamespaceConfig {
    /// Backoff used when joining folders from pending invites.
    pub invite_retry: RetryConfig,

    /// Unacknowledged pending entries older than this are dropped from
    /// listings. `None` keeps them until their operation settles.
    #[serde(deserialize_with = "optional_duration")]
    pub pending_expiry: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub max_times: usize,
    #[serde(deserialize_with = "duration")]
    pub min_delay: Duration,
    #[serde(deserialize_with = "duration")]
    pub max_delay: Duration,
    pub factor: f32,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            invite_retry: RetryConfig::default(),
            pending_expiry: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_times: 5,
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
        }
    }
}

impl NamespaceConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml_ng::from_str(text)?)
    }
}

impl RetryConfig {
    #[must_use]
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_factor(self.factor)
            .with_max_times(self.max_times)
    }
}

fn duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    parse_duration::parse(&text).map_err(serde::de::Error::custom)
}

fn optional_duration<'de, D>(deserializer: D) -> std::result::Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(text) => parse_duration::parse(&text)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
