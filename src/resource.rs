// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{
    ciphertext::CipherText,
    config::RegulatorConfig,
    curve::CurveTrait,
    elgamal::{generate_point, point_decrypt, point_encrypt},
    errors::Result,
    keys::PublicKey,
    symmetric::{decrypt_symmetric, derive_symmetric_key, encrypt_symmetric},
};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

/// A resource payload encrypted under a fresh key point, with that point
/// encrypted under the collective public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "C: CurveTrait", rename_all = "camelCase")]
pub struct SealedResource<C: CurveTrait> {
    encrypted_key: CipherText<C>,
    #[serde(with = "crate::utils::base64_bytes")]
    payload: Vec<u8>,
}

impl<C: CurveTrait> SealedResource<C> {
    /// Seal `plaintext` so that it can only be opened through a key switch
    /// (or by a regulator holding the collective private key).
    #[instrument(skip_all)]
    pub fn seal<R: RngCore + CryptoRng>(
        collective_pk: &PublicKey<C>,
        plaintext: &[u8],
        rng: &mut R,
    ) -> Result<Self> {
        let key_point: C = generate_point(rng);
        let payload = encrypt_symmetric(plaintext, &derive_symmetric_key(&key_point), rng)?;
        let encrypted_key = point_encrypt(collective_pk, &key_point, rng);
        Ok(Self {
            encrypted_key,
            payload,
        })
    }

    pub fn encrypted_key(&self) -> &CipherText<C> {
        &self.encrypted_key
    }

    /// `nonce || ciphertext || tag`.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Decrypt the payload with a recovered key point. A wrong point fails
    /// with `AuthenticationFailed`.
    pub fn open_with_key_point(&self, key_point: &C) -> Result<Vec<u8>> {
        decrypt_symmetric(&self.payload, &derive_symmetric_key(key_point))
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serialize!(self)
    }

    pub fn from_json(json: &[u8]) -> Result<Self> {
        deserialize!(json)
    }
}

/// Supervisory role that opens sealed resources directly with the
/// collective private key, without a key-switch session.
#[derive(Debug)]
pub struct Regulator<C: CurveTrait> {
    config: RegulatorConfig<C>,
}

impl<C: CurveTrait> Regulator<C> {
    pub fn new(config: RegulatorConfig<C>) -> Self {
        Self { config }
    }

    #[instrument(skip_all)]
    pub fn open(&self, sealed: &SealedResource<C>) -> Result<Vec<u8>> {
        let key_point = point_decrypt(
            sealed.encrypted_key(),
            self.config.collective_private_key(),
        );
        let plaintext = sealed.open_with_key_point(&key_point)?;
        info!("Regulator opened a sealed resource");
        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        curve::TestCurve,
        errors::InternalError,
        keys::{collective_private_key, CollectivePublicKey, KeyPair},
        utils::testing::init_testing,
    };

    #[test]
    fn regulator_opens_sealed_resources() {
        let rng = &mut init_testing();
        let pairs: Vec<KeyPair<TestCurve>> = (0..3).map(|_| KeyPair::generate(rng)).collect();
        let collective =
            CollectivePublicKey::new(pairs.iter().map(|p| *p.public()).collect()).unwrap();
        let sealed = SealedResource::seal(collective.public_key(), b"medical record", rng).unwrap();

        let private =
            collective_private_key(&pairs.iter().map(|p| p.private()).collect::<Vec<_>>())
                .unwrap();
        let regulator = Regulator::new(RegulatorConfig::new(private));
        assert_eq!(regulator.open(&sealed).unwrap(), b"medical record");
    }

    #[test]
    fn wrong_key_point_fails_authentication() {
        let rng = &mut init_testing();
        let pair = KeyPair::<TestCurve>::generate(rng);
        let sealed = SealedResource::seal(pair.public(), b"payload", rng).unwrap();
        let wrong: TestCurve = generate_point(rng);
        assert_eq!(
            sealed.open_with_key_point(&wrong),
            Err(InternalError::AuthenticationFailed)
        );

        let right = point_decrypt(sealed.encrypted_key(), pair.private());
        assert_eq!(sealed.open_with_key_point(&right).unwrap(), b"payload");
    }

    #[test]
    fn json_round_trips() {
        let rng = &mut init_testing();
        let pair = KeyPair::<TestCurve>::generate(rng);
        let sealed = SealedResource::seal(pair.public(), b"payload", rng).unwrap();
        let json = sealed.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert!(value["encryptedKey"].is_string());
        assert!(value["payload"].is_string());
        assert_eq!(SealedResource::from_json(&json).unwrap(), sealed);
    }
}
