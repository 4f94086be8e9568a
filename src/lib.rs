// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Threshold key switching (proxy re-encryption) over SM2.
//!
//! A resource is sealed under a fresh symmetric key, and the curve point
//! that key is derived from is ElGamal-encrypted under the collective public
//! key of `n` participants (the sum of their public keys). No single
//! participant can decrypt it. To grant a requester access, every participant
//! publishes a *share* that re-encrypts the key point toward a one-time
//! target key chosen by the requester, together with a zero-knowledge proof
//! that the share was honestly computed. Folding all `n` shares into the
//! encrypted key yields a ciphertext the requester decrypts with its own
//! target private key.
//!
//! # Layout
//! - [`keys`], [`ciphertext`], [`elgamal`] and [`symmetric`] are the
//!   primitives: key pairs, the 128-byte ciphertext codec, point
//!   encryption, and AES-256-GCM under a key derived from a point.
//! - [`keyswitch`] computes, combines and proves shares.
//! - [`resource`] seals payloads and lets a regulator holding the collective
//!   private key open them directly.
//! - [`session`] runs sessions over a ledger: a participant
//!   [`KeySwitchServer`](session::KeySwitchServer) answers triggers and a
//!   requester [`KeySwitchClient`](session::KeySwitchClient) collects the
//!   answers.
//!
//! Only the `n`-of-`n` case is supported: every configured participant must
//! answer for a session to succeed.

#[macro_use]
pub mod errors;

pub mod ciphertext;
pub mod config;
pub mod curve;
pub mod elgamal;
pub mod keys;
pub mod keyswitch;
pub mod p256;
pub mod resource;
pub mod session;
pub mod sm2;
pub mod symmetric;
mod utils;

pub use ciphertext::{CipherText, Share, CIPHERTEXT_BYTES};
pub use config::{CollectorConfig, ParticipantConfig, RegulatorConfig};
pub use curve::{CurveTrait, DefaultCurve, ScalarTrait};
pub use elgamal::{generate_point, point_decrypt, point_encrypt};
pub use errors::{CallerError, InternalError, Result};
pub use keys::{combine_public_keys, CollectivePublicKey, KeyPair, PrivateKey, PublicKey};
pub use keyswitch::{share_cal, share_proof_gen, share_proof_verify, share_replace, ShareProof};
pub use resource::{Regulator, SealedResource};
pub use symmetric::{decrypt_symmetric, derive_symmetric_key, encrypt_symmetric, SymmetricKey};
