// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Key-switch sessions run through the public API against the in-memory
//! ledger.

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::{
    collections::HashSet,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};
use tss_keyswitch::{
    generate_point, point_encrypt,
    session::{
        result_event_id, CancellationToken, InMemoryLedger, KeySwitchClient, KeySwitchRequest,
        KeySwitchResult, KeySwitchServer, Ledger, ListAwaitQuery, PollingTransport,
        CREATE_KEY_SWITCH_RESULT, TRIGGER_EVENT_ID,
    },
    share_cal, share_proof_gen, CipherText, CollectivePublicKey, CollectorConfig, DefaultCurve,
    InternalError, KeyPair, ParticipantConfig, PublicKey, SealedResource,
};

type Curve = DefaultCurve;

const RESOURCE: &str = "patient-42";

struct Network {
    ledger: Arc<InMemoryLedger>,
    participants: Vec<KeyPair<Curve>>,
    roster: CollectivePublicKey<Curve>,
}

impl Network {
    fn new(rng: &mut StdRng, n: usize) -> Self {
        let participants: Vec<KeyPair<Curve>> = (0..n).map(|_| KeyPair::generate(rng)).collect();
        let roster =
            CollectivePublicKey::new(participants.iter().map(|p| *p.public()).collect()).unwrap();
        Self {
            ledger: Arc::new(InMemoryLedger::new()),
            participants,
            roster,
        }
    }

    /// Store a resource whose key point is known to the test.
    fn store_key_point(&self, rng: &mut StdRng) -> (Curve, CipherText<Curve>) {
        let key_point: Curve = generate_point(rng);
        let encrypted = point_encrypt(self.roster.public_key(), &key_point, rng);
        self.ledger
            .put_resource(RESOURCE, encrypted.to_bytes(), Vec::new());
        (key_point, encrypted)
    }

    fn client(&self) -> KeySwitchClient<Curve> {
        KeySwitchClient::new(
            CollectorConfig::new(self.roster.clone()),
            self.ledger.clone(),
            self.ledger.clone(),
        )
    }

    fn start_servers(&self, count: usize) -> Vec<KeySwitchServer> {
        self.participants[..count]
            .iter()
            .map(|p| {
                KeySwitchServer::start(
                    ParticipantConfig::new(p.clone()),
                    self.ledger.clone(),
                    self.ledger.clone(),
                )
                .unwrap()
            })
            .collect()
    }

    /// Compute a result as `signer` would, claiming it comes from `claimed`.
    fn answer(
        &self,
        rng: &mut StdRng,
        request: &KeySwitchRequest<Curve>,
        encrypted: &CipherText<Curve>,
        signer: &KeyPair<Curve>,
        claimed: &PublicKey<Curve>,
    ) -> KeySwitchResult<Curve> {
        let (share, s) = share_cal(request.target(), encrypted.k(), signer.private(), rng);
        let zk_proof = share_proof_gen(
            &s,
            signer.private(),
            &share,
            request.target(),
            encrypted.k(),
            rng,
        )
        .unwrap();
        KeySwitchResult {
            session_id: request.session_id().clone(),
            share,
            zk_proof,
            participant_pk: *claimed,
        }
    }

    fn publish(&self, result: &KeySwitchResult<Curve>) {
        let json = serde_json::to_vec(result).unwrap();
        self.ledger
            .execute(CREATE_KEY_SWITCH_RESULT, &[json.as_slice()])
            .unwrap();
    }

    fn result_subscribers(&self, request: &KeySwitchRequest<Curve>) -> usize {
        self.ledger
            .subscriber_count(&result_event_id(request.session_id()))
    }
}

#[test]
fn three_participants_switch_a_key_to_the_requester() {
    let rng = &mut StdRng::from_entropy();
    let network = Network::new(rng, 3);
    let (key_point, encrypted) = network.store_key_point(rng);
    let servers = network.start_servers(3);

    let client = network.client();
    let target = KeyPair::<Curve>::generate(rng);
    let request = client.trigger(RESOURCE, None, target.public()).unwrap();
    let results = client
        .await_results(
            &request,
            3,
            Some(Duration::from_secs(10)),
            &CancellationToken::new(),
        )
        .unwrap();
    assert_eq!(results.len(), 3);

    let recovered = client
        .recover_key_point(&encrypted, &results, target.private())
        .unwrap();
    assert_eq!(recovered, key_point);
    assert_eq!(network.result_subscribers(&request), 0);

    for server in servers {
        server.stop();
    }
    assert_eq!(network.ledger.subscriber_count(TRIGGER_EVENT_ID), 0);
}

#[test]
fn sealed_resources_are_opened_through_a_session() {
    let rng = &mut StdRng::from_entropy();
    let network = Network::new(rng, 3);
    let sealed =
        SealedResource::seal(network.roster.public_key(), b"blood type: AB-", rng).unwrap();
    network.ledger.put_resource(
        RESOURCE,
        sealed.encrypted_key().to_bytes(),
        sealed.to_json().unwrap(),
    );
    let _servers = network.start_servers(3);

    let client = network.client();
    let target = KeyPair::<Curve>::generate(rng);
    let request = client.trigger(RESOURCE, None, target.public()).unwrap();
    let plaintext = client
        .decrypt_resource(
            &request,
            target.private(),
            Some(Duration::from_secs(10)),
            &CancellationToken::new(),
        )
        .unwrap();
    assert_eq!(plaintext, b"blood type: AB-");

    // Another requester's key cannot stand in for the target.
    let other = KeyPair::<Curve>::generate(rng);
    assert!(client
        .decrypt_resource(&request, other.private(), None, &CancellationToken::new())
        .is_err());
}

#[test]
fn two_of_three_results_time_out() {
    let rng = &mut StdRng::from_entropy();
    let network = Network::new(rng, 3);
    let (_, encrypted) = network.store_key_point(rng);
    let client = network.client();
    let target = KeyPair::<Curve>::generate(rng);
    let request = client.trigger(RESOURCE, None, target.public()).unwrap();
    for p in &network.participants[..2] {
        let result = network.answer(rng, &request, &encrypted, p, p.public());
        network.publish(&result);
    }

    let started = Instant::now();
    let err = client
        .await_results(
            &request,
            3,
            Some(Duration::from_millis(100)),
            &CancellationToken::new(),
        )
        .unwrap_err();
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(
        err,
        InternalError::GatewayTimeout {
            expected: 3,
            received: 2
        }
    );
    assert!(err.is_retryable());
    assert_eq!(err.http_status(), 504);
    assert_eq!(network.result_subscribers(&request), 0);
}

#[test]
fn results_in_any_order_are_collected_once() {
    let rng = &mut StdRng::from_entropy();
    let network = Network::new(rng, 3);
    let (key_point, encrypted) = network.store_key_point(rng);
    let client = network.client();
    let target = KeyPair::<Curve>::generate(rng);
    let request = client.trigger(RESOURCE, None, target.public()).unwrap();

    let mut results: Vec<_> = network
        .participants
        .iter()
        .map(|p| network.answer(rng, &request, &encrypted, p, p.public()))
        .collect();
    // Every result is delivered twice.
    results.extend(results.clone());
    results.shuffle(rng);

    let publisher = {
        let ledger = network.ledger.clone();
        thread::spawn(move || {
            for result in results {
                let json = serde_json::to_vec(&result).unwrap();
                ledger
                    .execute(CREATE_KEY_SWITCH_RESULT, &[json.as_slice()])
                    .unwrap();
                thread::sleep(Duration::from_millis(5));
            }
        })
    };

    let collected = client
        .await_results(
            &request,
            3,
            Some(Duration::from_secs(10)),
            &CancellationToken::new(),
        )
        .unwrap();
    publisher.join().unwrap();

    assert_eq!(collected.len(), 3);
    let distinct: HashSet<_> = collected.iter().map(|r| r.participant_pk).collect();
    assert_eq!(distinct.len(), 3);
    assert_eq!(
        client
            .recover_key_point(&encrypted, &collected, target.private())
            .unwrap(),
        key_point
    );
}

#[test]
fn duplicate_participant_results_count_once() {
    let rng = &mut StdRng::from_entropy();
    let network = Network::new(rng, 3);
    let (_, encrypted) = network.store_key_point(rng);
    let client = network.client();
    let target = KeyPair::<Curve>::generate(rng);
    let request = client.trigger(RESOURCE, None, target.public()).unwrap();

    let a = &network.participants[0];
    let b = &network.participants[1];
    // Two distinct, individually valid results from A.
    for p in [a, a, b] {
        let result = network.answer(rng, &request, &encrypted, p, p.public());
        network.publish(&result);
    }

    let err = client
        .await_results(
            &request,
            3,
            Some(Duration::from_millis(150)),
            &CancellationToken::new(),
        )
        .unwrap_err();
    assert_eq!(
        err,
        InternalError::GatewayTimeout {
            expected: 3,
            received: 2
        }
    );
}

#[test]
fn forged_and_foreign_results_are_rejected() {
    let rng = &mut StdRng::from_entropy();
    let network = Network::new(rng, 3);
    let (_, encrypted) = network.store_key_point(rng);
    let client = network.client();
    let target = KeyPair::<Curve>::generate(rng);
    let request = client.trigger(RESOURCE, None, target.public()).unwrap();

    let [a, b, c] = &network.participants[..] else {
        panic!("expected three participants");
    };
    let outsider = KeyPair::<Curve>::generate(rng);
    for result in [
        network.answer(rng, &request, &encrypted, a, a.public()),
        network.answer(rng, &request, &encrypted, b, b.public()),
        // Signed by an outsider but claiming to be C.
        network.answer(rng, &request, &encrypted, &outsider, c.public()),
        // Honest, but from a key outside the roster.
        network.answer(rng, &request, &encrypted, &outsider, outsider.public()),
    ] {
        network.publish(&result);
    }

    let err = client
        .await_results(
            &request,
            3,
            Some(Duration::from_millis(150)),
            &CancellationToken::new(),
        )
        .unwrap_err();
    assert_eq!(
        err,
        InternalError::GatewayTimeout {
            expected: 3,
            received: 2
        }
    );

    // C's genuine answer completes the session.
    network.publish(&network.answer(rng, &request, &encrypted, c, c.public()));
    let shares = client
        .list_await(
            &request,
            &ListAwaitQuery::from_query_string("numExpected=3&timeout=1000").unwrap(),
            &CancellationToken::new(),
        )
        .unwrap();
    assert_eq!(shares.len(), 3);
    let json: Vec<String> = serde_json::from_value(serde_json::to_value(&shares).unwrap()).unwrap();
    assert_eq!(json.len(), 3);
}

#[test]
fn cancelling_a_collector_releases_its_subscription() {
    let rng = &mut StdRng::from_entropy();
    let network = Network::new(rng, 3);
    network.store_key_point(rng);
    let client = network.client();
    let target = KeyPair::<Curve>::generate(rng);
    let request = client.trigger(RESOURCE, None, target.public()).unwrap();

    let cancel = CancellationToken::new();
    let canceller = {
        let cancel = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            cancel.cancel();
        })
    };

    let started = Instant::now();
    let err = client
        .await_results(&request, 3, Some(Duration::from_secs(30)), &cancel)
        .unwrap_err();
    canceller.join().unwrap();
    assert_eq!(err, InternalError::Cancelled);
    assert!(!err.is_retryable());
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(network.result_subscribers(&request), 0);

    // An already cancelled token stops the collector straight away.
    assert_eq!(
        client.await_results(&request, 1, None, &cancel).unwrap_err(),
        InternalError::Cancelled
    );
}

#[test]
fn sessions_run_over_a_polling_transport() {
    let rng = &mut StdRng::from_entropy();
    let network = Network::new(rng, 2);
    let (key_point, encrypted) = network.store_key_point(rng);
    let transport = Arc::new(PollingTransport::with_interval(
        network.ledger.clone(),
        Duration::from_millis(5),
    ));

    let servers: Vec<_> = network
        .participants
        .iter()
        .map(|p| {
            KeySwitchServer::start(
                ParticipantConfig::new(p.clone()).with_workers(1).unwrap(),
                network.ledger.clone(),
                transport.clone(),
            )
            .unwrap()
        })
        .collect();
    assert_eq!(transport.active_subscriptions(), 2);

    let client = KeySwitchClient::new(
        CollectorConfig::new(network.roster.clone()),
        network.ledger.clone(),
        transport.clone(),
    );
    let target = KeyPair::<Curve>::generate(rng);
    let request = client.trigger(RESOURCE, None, target.public()).unwrap();
    let results = client
        .await_results(
            &request,
            2,
            Some(Duration::from_secs(10)),
            &CancellationToken::new(),
        )
        .unwrap();
    assert_eq!(
        client
            .recover_key_point(&encrypted, &results, target.private())
            .unwrap(),
        key_point
    );

    for server in servers {
        server.stop();
    }
    assert_eq!(transport.active_subscriptions(), 0);
}

#[test]
fn triggers_need_an_approved_auth_session() {
    let rng = &mut StdRng::from_entropy();
    let network = Network::new(rng, 1);
    network.store_key_point(rng);
    network
        .ledger
        .approve_auth_session(RESOURCE, "auth-7")
        .unwrap();
    let client = network.client();
    let target = KeyPair::<Curve>::generate(rng);

    let err = client.trigger(RESOURCE, None, target.public()).unwrap_err();
    assert!(matches!(err, InternalError::Forbidden(_)));
    assert_eq!(err.http_status(), 403);
    let err = client
        .trigger(RESOURCE, Some("auth-8".into()), target.public())
        .unwrap_err();
    assert!(matches!(err, InternalError::Forbidden(_)));

    client
        .trigger(RESOURCE, Some("auth-7".into()), target.public())
        .unwrap();
    assert_eq!(network.ledger.event_count(TRIGGER_EVENT_ID), 1);
}

#[test]
fn impossible_collections_fail_fast() {
    let rng = &mut StdRng::from_entropy();
    assert!(CollectivePublicKey::<Curve>::new(Vec::new()).is_err());

    let network = Network::new(rng, 2);
    network.store_key_point(rng);
    let client = network.client();
    let target = KeyPair::<Curve>::generate(rng);
    let request = client.trigger(RESOURCE, None, target.public()).unwrap();

    let started = Instant::now();
    for n in [0, 3] {
        let err = client
            .await_results(&request, n, None, &CancellationToken::new())
            .unwrap_err();
        assert_eq!(err.http_status(), 400);
    }
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(ListAwaitQuery::from_query_string("numExpected=0").is_err());
}

#[test]
fn list_await_returns_exactly_the_expected_number_of_stored_shares() {
    let rng = &mut StdRng::from_entropy();
    let network = Network::new(rng, 3);
    let (_, encrypted) = network.store_key_point(rng);
    let client = network.client();
    let target = KeyPair::<Curve>::generate(rng);
    let request = client.trigger(RESOURCE, None, target.public()).unwrap();
    for p in &network.participants {
        network.publish(&network.answer(rng, &request, &encrypted, p, p.public()));
    }

    let shares = client
        .list_await(
            &request,
            &ListAwaitQuery::parse(Some("2"), Some("200")).unwrap(),
            &CancellationToken::new(),
        )
        .unwrap();
    assert_eq!(shares.len(), 2);
    assert_eq!(network.result_subscribers(&request), 0);
}

#[test]
fn collection_stops_at_the_expected_number_of_live_results() {
    let rng = &mut StdRng::from_entropy();
    let network = Network::new(rng, 3);
    let (_, encrypted) = network.store_key_point(rng);
    let client = network.client();
    let target = KeyPair::<Curve>::generate(rng);
    let request = client.trigger(RESOURCE, None, target.public()).unwrap();
    let results: Vec<_> = network
        .participants
        .iter()
        .map(|p| network.answer(rng, &request, &encrypted, p, p.public()))
        .collect();

    // Publish only once the collector listens, so every result arrives as an
    // event rather than through the stored-result catch-up.
    let publisher = {
        let ledger = network.ledger.clone();
        let event_id = result_event_id(request.session_id());
        thread::spawn(move || {
            while ledger.subscriber_count(&event_id) == 0 {
                thread::sleep(Duration::from_millis(1));
            }
            for result in results {
                let json = serde_json::to_vec(&result).unwrap();
                ledger
                    .execute(CREATE_KEY_SWITCH_RESULT, &[json.as_slice()])
                    .unwrap();
            }
        })
    };

    let collected = client
        .await_results(
            &request,
            2,
            Some(Duration::from_secs(10)),
            &CancellationToken::new(),
        )
        .unwrap();
    publisher.join().unwrap();

    assert_eq!(collected.len(), 2);
    let distinct: HashSet<_> = collected.iter().map(|r| r.participant_pk).collect();
    assert_eq!(distinct.len(), 2);
}
