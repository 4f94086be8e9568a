// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Key-switch shares and their proofs.
//!
//! A resource key encrypted under the collective public key is switched to a
//! requester's key in three steps:
//!
//! 1. every participant computes a [`share_cal`] share toward the
//!    requester's target key and attaches a [`ShareProof`];
//! 2. the requester checks every proof with [`share_proof_verify`];
//! 3. the requester folds all shares into the encrypted key with
//!    [`share_replace`] and decrypts the result with its own private key.

mod proof;
mod share;

pub use proof::{share_proof_gen, share_proof_verify, CommonInput, ShareProof, SHARE_PROOF_BYTES};
pub use share::{share_cal, share_replace, ShareRandomness};
