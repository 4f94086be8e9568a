// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! ## Example usage of the [`tss_keyswitch`] crate.
//!
//! Every participant runs a [`KeySwitchServer`] with its own worker threads.
//! The main thread plays the data owner, who seals a resource under the
//! collective public key, and then the requester, who triggers a key-switch
//! session and opens the resource with a one-time key.
//!
//! All parties share one [`InMemoryLedger`], which stands in for the ledger
//! and its event feed.
//!
//! # Warning: Trust Model
//! The in-memory ledger does not authenticate who publishes a result. The
//! share proofs stop a participant from answering under another
//! participant's key, but nothing here stops a process from publishing
//! triggers for any resource unless an auth session is required for it.

use anyhow::ensure;
use clap::{command, Parser};
use rand::{rngs::StdRng, SeedableRng};
use std::{sync::Arc, time::Duration};
use tracing::{info, span, Level};
use tracing_subscriber::{self, EnvFilter};
use tss_keyswitch::{
    session::{CancellationToken, InMemoryLedger, KeySwitchClient, KeySwitchServer},
    CollectivePublicKey, CollectorConfig, DefaultCurve, KeyPair, ParticipantConfig,
    SealedResource,
};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of participants holding a share of the collective key.
    #[arg(short, long, default_value_t = 3)]
    participants: usize,
    /// Number of worker threads per participant.
    #[arg(short, long, default_value_t = 2)]
    workers: usize,
    /// How long the requester waits for every participant's share.
    #[arg(short, long, default_value_t = 20_000)]
    timeout_ms: u64,
    /// The payload to seal and recover.
    #[arg(long, default_value = "the quick brown fox")]
    message: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    // Set up logging.
    let filter = EnvFilter::from_default_env();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .compact()
        .init();
    let span = span!(Level::INFO, "main");
    let _enter = span.entered();

    ensure!(cli.participants > 0, "at least one participant is needed");
    let rng = &mut StdRng::from_entropy();
    let ledger = Arc::new(InMemoryLedger::new());

    // 1) Participants generate their keys and start answering triggers.
    let key_pairs: Vec<KeyPair<DefaultCurve>> = (0..cli.participants)
        .map(|_| KeyPair::generate(rng))
        .collect();
    let servers: Vec<KeySwitchServer> = key_pairs
        .iter()
        .map(|key_pair| {
            let config = ParticipantConfig::new(key_pair.clone()).with_workers(cli.workers)?;
            KeySwitchServer::start(config, ledger.clone(), ledger.clone())
        })
        .collect::<Result<_, _>>()?;
    info!("Started {} participant servers", servers.len());

    // 2) The data owner seals a resource under the collective public key.
    let roster = CollectivePublicKey::new(key_pairs.iter().map(|k| *k.public()).collect())?;
    let sealed = SealedResource::seal(roster.public_key(), cli.message.as_bytes(), rng)?;
    let resource_id = Uuid::new_v4().to_string();
    ledger.put_resource(
        &resource_id,
        sealed.encrypted_key().to_bytes(),
        sealed.to_json()?,
    );

    // 3) A requester switches the resource key to a one-time key and opens it.
    let config = CollectorConfig::new(roster)
        .with_default_timeout(Duration::from_millis(cli.timeout_ms))?;
    let client = KeySwitchClient::new(config, ledger.clone(), ledger.clone());
    let one_time = KeyPair::<DefaultCurve>::generate(rng);
    let request = client.trigger(&resource_id, None, one_time.public())?;
    let plaintext =
        client.decrypt_resource(&request, one_time.private(), None, &CancellationToken::new())?;

    // 4) Shut every participant down.
    for server in servers {
        server.stop();
    }

    println!(
        "Session {} recovered: {}",
        request.session_id(),
        String::from_utf8_lossy(&plaintext)
    );
    Ok(())
}
