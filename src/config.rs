// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Immutable configuration of the participant, requester and regulator
//! roles.
//!
//! Each role is handed its configuration when it is constructed; keys are
//! never looked up from process-wide state. Configurations can be loaded from
//! JSON, where keys are base64 strings:
//!
//! ```json
//! { "privateKey": "<32 bytes>", "workers": 2, "queueCapacity": 64 }
//! { "participants": ["<64 bytes>", "..."], "defaultTimeoutMs": 20000 }
//! { "collectivePrivateKey": "<32 bytes>" }
//! ```

use crate::{
    curve::{CurveTrait, FIELD_BYTES},
    errors::{CallerError, InternalError, Result},
    keys::{CollectivePublicKey, KeyPair, PrivateKey, PublicKey},
    utils::decode_base64,
};
use serde::Deserialize;
use std::time::Duration;
use tracing::error;
use zeroize::Zeroizing;

/// How long a collector waits for shares unless told otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Number of participant worker threads unless told otherwise.
pub const DEFAULT_WORKERS: usize = 2;

/// Number of observed triggers that may wait for a free worker.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

fn private_key_from_base64<C: CurveTrait>(encoded: &str) -> Result<PrivateKey<C>> {
    let bytes = Zeroizing::new(decode_base64(encoded)?);
    let bytes: &[u8; FIELD_BYTES] = bytes.as_slice().try_into().map_err(|_| {
        error!("Private key has {} bytes, expected {FIELD_BYTES}", bytes.len());
        CallerError::InvalidLength {
            expected: FIELD_BYTES,
            actual: bytes.len(),
        }
    })?;
    PrivateKey::try_from_bytes(bytes)
}

/// Configuration of a participant's key-switch server.
#[derive(Debug, Clone)]
pub struct ParticipantConfig<C: CurveTrait> {
    key_pair: KeyPair<C>,
    workers: usize,
    queue_capacity: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawParticipantConfig {
    private_key: String,
    #[serde(default = "default_workers")]
    workers: usize,
    #[serde(default = "default_queue_capacity")]
    queue_capacity: usize,
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl<C: CurveTrait> ParticipantConfig<C> {
    pub fn new(key_pair: KeyPair<C>) -> Self {
        Self {
            key_pair,
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Set the worker pool size, which must be positive.
    pub fn with_workers(mut self, workers: usize) -> Result<Self> {
        if workers == 0 {
            error!("A participant needs at least one worker");
            Err(InternalError::invalid_input("workers must be positive"))?;
        }
        self.workers = workers;
        Ok(self)
    }

    /// Set the trigger queue capacity, which must be positive.
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Result<Self> {
        if queue_capacity == 0 {
            error!("The trigger queue needs room for at least one trigger");
            Err(InternalError::invalid_input("queueCapacity must be positive"))?;
        }
        self.queue_capacity = queue_capacity;
        Ok(self)
    }

    pub fn from_json(json: &[u8]) -> Result<Self> {
        let raw: RawParticipantConfig = deserialize!(json)?;
        let key_pair = KeyPair::from_private(private_key_from_base64(&raw.private_key)?);
        Self::new(key_pair)
            .with_workers(raw.workers)?
            .with_queue_capacity(raw.queue_capacity)
    }

    pub fn key_pair(&self) -> &KeyPair<C> {
        &self.key_pair
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }
}

/// Configuration of a requester's collector.
#[derive(Debug, Clone)]
pub struct CollectorConfig<C: CurveTrait> {
    roster: CollectivePublicKey<C>,
    default_timeout: Duration,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
#[serde(bound = "C: CurveTrait")]
struct RawCollectorConfig<C: CurveTrait> {
    participants: Vec<PublicKey<C>>,
    #[serde(default)]
    default_timeout_ms: Option<u64>,
}

impl<C: CurveTrait> CollectorConfig<C> {
    pub fn new(roster: CollectivePublicKey<C>) -> Self {
        Self {
            roster,
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the timeout used when a caller does not supply one.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            error!("The default collector timeout must be positive");
            Err(InternalError::invalid_input("timeout must be positive"))?;
        }
        self.default_timeout = timeout;
        Ok(self)
    }

    pub fn from_json(json: &[u8]) -> Result<Self> {
        let raw: RawCollectorConfig<C> = deserialize!(json)?;
        let config = Self::new(CollectivePublicKey::new(raw.participants)?);
        match raw.default_timeout_ms {
            Some(ms) => config.with_default_timeout(Duration::from_millis(ms)),
            None => Ok(config),
        }
    }

    pub fn roster(&self) -> &CollectivePublicKey<C> {
        &self.roster
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }
}

/// Configuration of the supervisory role that holds the collective private
/// key. The key is read-only once loaded and never logged.
#[derive(Debug, Clone)]
pub struct RegulatorConfig<C: CurveTrait> {
    collective_private_key: PrivateKey<C>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawRegulatorConfig {
    collective_private_key: String,
}

impl<C: CurveTrait> RegulatorConfig<C> {
    pub fn new(collective_private_key: PrivateKey<C>) -> Self {
        Self {
            collective_private_key,
        }
    }

    pub fn from_json(json: &[u8]) -> Result<Self> {
        let raw: RawRegulatorConfig = deserialize!(json)?;
        Ok(Self::new(private_key_from_base64(&raw.collective_private_key)?))
    }

    pub fn collective_private_key(&self) -> &PrivateKey<C> {
        &self.collective_private_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{curve::TestCurve, utils::encode_base64, utils::testing::init_testing};

    #[test]
    fn participant_config_defaults() {
        let rng = &mut init_testing();
        let pair = KeyPair::<TestCurve>::generate(rng);
        let json = format!(
            r#"{{ "privateKey": "{}" }}"#,
            encode_base64(pair.private().to_bytes().as_slice())
        );
        let config = ParticipantConfig::<TestCurve>::from_json(json.as_bytes()).unwrap();
        assert_eq!(config.workers(), DEFAULT_WORKERS);
        assert_eq!(config.queue_capacity(), DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.key_pair().public(), pair.public());
        assert!(!format!("{config:?}").contains(&encode_base64(
            pair.private().to_bytes().as_slice()
        )));
    }

    #[test]
    fn participant_config_rejects_bad_values() {
        let rng = &mut init_testing();
        let pair = KeyPair::<TestCurve>::generate(rng);
        assert!(ParticipantConfig::new(pair.clone()).with_workers(0).is_err());
        assert!(ParticipantConfig::new(pair)
            .with_queue_capacity(0)
            .is_err());

        let short_key = format!(r#"{{ "privateKey": "{}" }}"#, encode_base64(&[1u8; 31]));
        assert!(ParticipantConfig::<TestCurve>::from_json(short_key.as_bytes()).is_err());
        assert!(ParticipantConfig::<TestCurve>::from_json(b"{}").is_err());
    }

    #[test]
    fn collector_config_from_json() {
        let rng = &mut init_testing();
        let keys: Vec<_> = (0..3)
            .map(|_| *KeyPair::<TestCurve>::generate(rng).public())
            .collect();
        let json = serde_json::json!({ "participants": keys, "defaultTimeoutMs": 250 });
        let config =
            CollectorConfig::<TestCurve>::from_json(&serde_json::to_vec(&json).unwrap()).unwrap();
        assert_eq!(config.roster().participants(), 3);
        assert_eq!(config.default_timeout(), Duration::from_millis(250));

        let json = serde_json::json!({ "participants": keys });
        let config =
            CollectorConfig::<TestCurve>::from_json(&serde_json::to_vec(&json).unwrap()).unwrap();
        assert_eq!(config.default_timeout(), DEFAULT_TIMEOUT);

        let empty = serde_json::json!({ "participants": [] });
        assert!(
            CollectorConfig::<TestCurve>::from_json(&serde_json::to_vec(&empty).unwrap()).is_err()
        );
    }

    #[test]
    fn regulator_config_from_json() {
        let rng = &mut init_testing();
        let key = PrivateKey::<TestCurve>::random(rng);
        let json = format!(
            r#"{{ "collectivePrivateKey": "{}" }}"#,
            encode_base64(key.to_bytes().as_slice())
        );
        let config = RegulatorConfig::<TestCurve>::from_json(json.as_bytes()).unwrap();
        assert_eq!(config.collective_private_key(), &key);
    }
}
