mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio_test::{assert_err, assert_ok};

use tennis_ingestion::directory::PlayerCandidate;
use tennis_ingestion::error::ResolveError;
use tennis_ingestion::ingest::Ingested;
use tennis_ingestion::jobs::{EnrichmentWorker, JobOutcome, JobStore};
use tennis_ingestion::model::{EnrichmentState, Player};
use tennis_ingestion::resolver::PlayerResolver;
use tennis_ingestion::store::{IdentityStore, MemoryStore};

use common::{candidate, harness, profile, raw_match, FakeDirectory, Harness};

async fn seed(h: &Harness, winner: &str, loser: &str) -> (Player, Player) {
    let ingested = assert_ok!(
        h.service
            .insert_new_match(&raw_match("2019-07-14", winner, loser), false)
            .await
    );
    match ingested {
        Ingested::Inserted(m) => (m.winner, m.loser),
        other => panic!("expected an insertion, got {other:?}"),
    }
}

fn herbert_pool() -> FakeDirectory {
    let mut dir = FakeDirectory::default();
    for i in 0..22 {
        dir = dir.with_candidate(candidate(&format!("D{i:03}"), &format!("Decoy{i}"), "Herbert"));
    }
    dir.with_candidate(candidate("HB01", "Pierre", "Herbertson"))
        .with_player(
            candidate("H996", "Pierre-Hugues", "Herbert"),
            profile("Pierre-Hugues", "Herbert", "France"),
        )
}

fn federer() -> PlayerCandidate {
    candidate("F324", "Roger", "Federer")
}

fn resolver(store: Arc<MemoryStore>, dir: Arc<FakeDirectory>) -> PlayerResolver {
    PlayerResolver::new(store, dir)
}

#[tokio::test]
async fn test_resolves_among_decoys() {
    let h = harness();
    seed(&h, "Herbert P.H.", "Mahut N.").await;
    let dir = Arc::new(herbert_pool());

    let resolver = resolver(h.store.clone(), dir.clone());
    let player = assert_ok!(resolver.fill_player_details("Herbert P.H.").await)
        .expect("player is stored");

    assert_eq!(player.external_id.as_deref(), Some("H996"));
    assert_eq!(player.enrichment_state(), EnrichmentState::Enriched);
    let detail = player.caracteristics.expect("detail written");
    assert_eq!(detail.player_id, player.id);
    assert_eq!(detail.detail.nationality.as_deref(), Some("France"));

    let stored = h.store.find_player(player.id).await.unwrap().unwrap();
    assert_eq!(stored.name, "Herbert P.H.");
    assert_eq!(stored.external_id.as_deref(), Some("H996"));
    assert!(stored.caracteristics.is_some());
}

#[tokio::test]
async fn test_single_candidate_adopted() {
    let h = harness();
    seed(&h, "Federer R.", "Nadal R.").await;
    let dir = Arc::new(FakeDirectory::default().with_player(
        candidate("F324", "Roger", "Federer"),
        profile("Roger", "Federer", "Switzerland"),
    ));

    let player = assert_ok!(resolver(h.store.clone(), dir).fill_player_details("Federer R.").await)
        .expect("player is stored");
    assert_eq!(player.external_id.as_deref(), Some("F324"));
}

#[tokio::test]
async fn test_absent_player_is_noop() {
    let h = harness();
    let dir = Arc::new(herbert_pool());

    let resolver = resolver(h.store.clone(), dir.clone());
    let result = assert_ok!(resolver.fill_player_details("Herbert P.H.").await);
    assert!(result.is_none());
    assert_eq!(dir.searches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_no_matching_candidate() {
    let h = harness();
    seed(&h, "Herbert Q.", "Mahut N.").await;
    let dir = Arc::new(herbert_pool());

    let err = assert_err!(resolver(h.store.clone(), dir).fill_player_details("Herbert Q.").await);
    assert!(matches!(err, ResolveError::PlayerNotFound(ref name) if name == "Herbert Q."));

    let stored = h.store.find_player_by_name("Herbert Q.").await.unwrap().unwrap();
    assert_eq!(stored.enrichment_state(), EnrichmentState::Unresolved);
}

#[tokio::test]
async fn test_stale_external_id_not_found() {
    let h = harness();
    let (winner, _) = seed(&h, "Federer R.", "Nadal R.").await;
    assert_ok!(h.store.add_external_identity(winner.id, "GONE").await);
    let dir = Arc::new(FakeDirectory::default().with_player(
        candidate("F324", "Roger", "Federer"),
        profile("Roger", "Federer", "Switzerland"),
    ));

    let resolver = resolver(h.store.clone(), dir.clone());
    let err = assert_err!(resolver.fill_player_details("Federer R.").await);
    assert!(matches!(err, ResolveError::PlayerNotFound(_)));
    assert_eq!(dir.detail_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_resolved_player_gets_detail() {
    let h = harness();
    let (winner, _) = seed(&h, "Federer R.", "Nadal R.").await;
    assert_ok!(h.store.add_external_identity(winner.id, "F324").await);
    let dir = Arc::new(
        FakeDirectory::default()
            .with_candidate(candidate("R001", "Rafael", "Federer"))
            .with_player(
                candidate("F324", "Roger", "Federer"),
                profile("Roger", "Federer", "Switzerland"),
            ),
    );

    let player = assert_ok!(resolver(h.store.clone(), dir).fill_player_details("Federer R.").await)
        .expect("player is stored");
    assert_eq!(player.external_id.as_deref(), Some("F324"));
    assert_eq!(player.enrichment_state(), EnrichmentState::Enriched);
}

#[tokio::test]
async fn test_enriched_player_untouched() {
    let h = harness();
    seed(&h, "Federer R.", "Nadal R.").await;
    let dir = Arc::new(FakeDirectory::default().with_player(
        candidate("F324", "Roger", "Federer"),
        profile("Roger", "Federer", "Switzerland"),
    ));
    let resolver = resolver(h.store.clone(), dir.clone());

    let first = assert_ok!(resolver.fill_player_details("Federer R.").await);
    let second = assert_ok!(resolver.fill_player_details("Federer R.").await);

    assert_eq!(first, second);
    assert_eq!(dir.searches.load(Ordering::SeqCst), 1);
    assert_eq!(dir.detail_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_transient_directory_error() {
    let h = harness();
    seed(&h, "Federer R.", "Nadal R.").await;
    let dir = Arc::new(
        FakeDirectory::default()
            .with_player(
                candidate("F324", "Roger", "Federer"),
                profile("Roger", "Federer", "Switzerland"),
            )
            .failing(1),
    );

    let err = assert_err!(resolver(h.store.clone(), dir).fill_player_details("Federer R.").await);
    assert!(err.is_transient());
}

fn worker(
    h: &Harness,
    dir: FakeDirectory,
    timeout: Duration,
    max_attempts: u32,
) -> EnrichmentWorker {
    let resolver = Arc::new(PlayerResolver::new(h.store.clone(), Arc::new(dir)));
    EnrichmentWorker::new(h.jobs.clone(), resolver, timeout, max_attempts)
        .with_backoff_base(Duration::from_secs(10))
}

#[tokio::test]
async fn test_worker_enriches_and_releases_claim() {
    let h = harness();
    seed(&h, "Federer R.", "Nadal R.").await;
    let dir = FakeDirectory::default()
        .with_player(federer(), profile("Roger", "Federer", "Switzerland"))
        .with_player(
            candidate("N409", "Rafael", "Nadal"),
            profile("Rafael", "Nadal", "Spain"),
        );
    let worker = worker(&h, dir, Duration::from_secs(5), 3);

    assert_eq!(worker.run_once().await.unwrap(), Some(JobOutcome::Done));
    assert_eq!(worker.run_once().await.unwrap(), Some(JobOutcome::Done));
    assert_eq!(worker.run_once().await.unwrap(), None);

    assert_eq!(h.jobs.live_count().await, 0);
    for name in ["Federer R.", "Nadal R."] {
        let p = h.store.find_player_by_name(name).await.unwrap().unwrap();
        assert_eq!(p.enrichment_state(), EnrichmentState::Enriched);
    }
}

#[tokio::test]
async fn test_worker_drops_unknown_player() {
    let h = harness();
    seed(&h, "Federer R.", "Nadal R.").await;
    let worker = worker(&h, FakeDirectory::default(), Duration::from_secs(5), 3);

    assert_eq!(worker.run_once().await.unwrap(), Some(JobOutcome::NotFound));
    assert_eq!(worker.run_once().await.unwrap(), Some(JobOutcome::NotFound));
    assert_eq!(h.jobs.live_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_worker_retries_transient_failures() {
    let h = harness();
    seed(&h, "Federer R.", "Nadal R.").await;
    // Only Federer is left queued
    let nadal = h.jobs.find("Nadal R.").await.unwrap().unwrap();
    h.jobs.finish(&nadal).await.unwrap();

    let dir = FakeDirectory::default()
        .with_player(federer(), profile("Roger", "Federer", "Switzerland"))
        .failing(1);
    let worker = worker(&h, dir, Duration::from_secs(5), 3);

    assert_eq!(
        worker.run_once().await.unwrap(),
        Some(JobOutcome::Retrying {
            attempt: 1,
            delay: Duration::from_secs(10)
        })
    );
    // Claim kept while waiting, so a new request is absorbed
    let pending = h.jobs.find("Federer R.").await.unwrap().unwrap();
    assert_eq!(pending.attempts, 1);
    assert_eq!(worker.run_once().await.unwrap(), None);

    tokio::time::advance(Duration::from_secs(11)).await;
    assert_eq!(worker.run_once().await.unwrap(), Some(JobOutcome::Done));
    assert_eq!(h.jobs.live_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_worker_gives_up_after_max_attempts() {
    let h = harness();
    seed(&h, "Federer R.", "Nadal R.").await;
    let nadal = h.jobs.find("Nadal R.").await.unwrap().unwrap();
    h.jobs.finish(&nadal).await.unwrap();

    let dir = FakeDirectory::default().failing(usize::MAX);
    let worker = worker(&h, dir, Duration::from_secs(5), 2);

    assert!(matches!(
        worker.run_once().await.unwrap(),
        Some(JobOutcome::Retrying { attempt: 1, .. })
    ));
    tokio::time::advance(Duration::from_secs(11)).await;
    assert!(matches!(worker.run_once().await.unwrap(), Some(JobOutcome::Failed(_))));
    assert_eq!(h.jobs.live_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_worker_timeout_is_retried() {
    let h = harness();
    seed(&h, "Federer R.", "Nadal R.").await;
    let nadal = h.jobs.find("Nadal R.").await.unwrap().unwrap();
    h.jobs.finish(&nadal).await.unwrap();

    let dir = FakeDirectory::default()
        .with_player(federer(), profile("Roger", "Federer", "Switzerland"))
        .slow(Duration::from_secs(60));
    let worker = worker(&h, dir, Duration::from_secs(5), 3);

    assert!(matches!(
        worker.run_once().await.unwrap(),
        Some(JobOutcome::Retrying { attempt: 1, .. })
    ));
    let player = h.store.find_player_by_name("Federer R.").await.unwrap().unwrap();
    assert_eq!(player.enrichment_state(), EnrichmentState::Unresolved);
}

#[tokio::test(start_paused = true)]
async fn test_worker_stops_on_shutdown() {
    let h = harness();
    let worker = worker(&h, FakeDirectory::default(), Duration::from_secs(5), 3)
        .with_poll_interval(Duration::from_millis(100));
    let (tx, rx) = tokio::sync::watch::channel(false);

    let handle = tokio::spawn(worker.run(0, rx));
    tokio::time::sleep(Duration::from_millis(250)).await;
    tx.send(true).unwrap();

    let joined = assert_ok!(tokio::time::timeout(Duration::from_secs(1), handle).await);
    assert_ok!(joined);
}
