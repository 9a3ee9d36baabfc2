use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use reelbox::api::{router, state::AppState};
use reelbox::config::StrategyProfile;
use reelbox::extraction::testing::ScriptedBackend;
use reelbox::extraction::{
    ExtractionError, ExtractionFailureKind, ExtractionStrategyChain, FailureClass, Variant,
};
use reelbox::formats::ShortlistPolicy;
use reelbox::observability::Metrics;
use reelbox::pipeline::{Pipeline, PipelineError, PipelineSettings};
use reelbox::session::{ConversationId, SessionError};
use reelbox::staging::{StagingArea, StagingError};

const ALICE: ConversationId = ConversationId { chat: 1, user: 1 };
const BOB: ConversationId = ConversationId { chat: 2, user: 2 };

async fn build_pipeline(dir: &TempDir, backend: ScriptedBackend, strategies: &[&str]) -> Arc<Pipeline> {
    let chain = Arc::new(ExtractionStrategyChain::new(
        Arc::new(backend),
        strategies.iter().map(|s| StrategyProfile::named(*s)).collect(),
    ));
    let staging = Arc::new(StagingArea::open(dir.path(), "mp4").await.unwrap());

    Arc::new(Pipeline::new(
        chain,
        staging,
        Arc::new(Metrics::new()),
        PipelineSettings {
            shortlist: ShortlistPolicy {
                max_choices: 5,
                max_height: None,
            },
            max_concurrent_jobs: 4,
            job_timeout: Duration::from_secs(10),
            public_base_url: "https://files.example/".to_string(),
        },
    ))
}

fn abcd() -> Vec<Variant> {
    vec![
        Variant::new("A", Some(1080), "mp4"),
        Variant::new("B", Some(1080), "mp4"),
        Variant::new("C", Some(720), "mp4"),
        Variant::new("D", None, "m4a"),
    ]
}

#[tokio::test]
async fn test_duplicate_and_heightless_variants_are_reduced() {
    let dir = TempDir::new().unwrap();
    let pipeline = build_pipeline(&dir, ScriptedBackend::new().probe_ok("s1", abcd()), &["s1"]).await;
    let cancel = CancellationToken::new();

    let offer = pipeline
        .submit(ALICE, "https://video.example/a", &cancel)
        .await
        .unwrap();

    let ids: Vec<&str> = offer.shortlist.iter().map(|v| v.id.as_str()).collect();
    assert_eq!(ids, ["A", "C"]);

    let delivery = pipeline
        .select(ALICE, offer.generation, 1, &cancel)
        .await
        .unwrap();
    assert_eq!(delivery.height, Some(720));
    let content = std::fs::read_to_string(&delivery.file.path).unwrap();
    assert!(content.contains("C+bestaudio/best"));
}

#[tokio::test]
async fn test_every_strategy_restricted() {
    let dir = TempDir::new().unwrap();
    let backend = ScriptedBackend::new()
        .probe_err("s1", FailureClass::AccessRestricted, "Sign in to confirm you're not a bot")
        .probe_err("s2", FailureClass::AccessRestricted, "HTTP Error 403: Forbidden");
    let pipeline = build_pipeline(&dir, backend, &["s1", "s2"]).await;

    let error = pipeline
        .submit(ALICE, "https://video.example/a", &CancellationToken::new())
        .await
        .unwrap_err();

    match error {
        PipelineError::Extraction(ExtractionError::Failed { kind, attempts }) => {
            assert_eq!(kind, ExtractionFailureKind::AccessRestricted);
            assert_eq!(attempts.len(), 2);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(pipeline.metrics().snapshot().extractions_failed, 1);
    assert!(pipeline.sessions().is_empty().await);
}

#[tokio::test]
async fn test_concurrent_conversations_stay_isolated() {
    let dir = TempDir::new().unwrap();
    let backend = ScriptedBackend::new()
        .probe_ok("s1", abcd())
        .with_delay(Duration::from_millis(20));
    let pipeline = build_pipeline(&dir, backend, &["s1"]).await;
    let cancel = CancellationToken::new();

    let (alice, bob) = tokio::join!(
        pipeline.submit(ALICE, "https://video.example/alice", &cancel),
        pipeline.submit(BOB, "https://video.example/bob", &cancel),
    );
    let (alice, bob) = (alice.unwrap(), bob.unwrap());
    assert_ne!(alice.generation, bob.generation);
    assert_eq!(alice.title, "Title of https://video.example/alice");
    assert_eq!(bob.title, "Title of https://video.example/bob");

    let (alice_file, bob_file) = tokio::join!(
        pipeline.select(ALICE, alice.generation, 0, &cancel),
        pipeline.select(BOB, bob.generation, 0, &cancel),
    );
    let (alice_file, bob_file) = (alice_file.unwrap(), bob_file.unwrap());

    assert_ne!(alice_file.file.identifier, bob_file.file.identifier);
    assert_eq!(alice_file.file.owner, ALICE);
    assert_eq!(bob_file.file.owner, BOB);
    assert!(
        std::fs::read_to_string(&alice_file.file.path)
            .unwrap()
            .starts_with("https://video.example/alice\n")
    );
    assert!(
        std::fs::read_to_string(&bob_file.file.path)
            .unwrap()
            .starts_with("https://video.example/bob\n")
    );

    // A selection rendered for one conversation is never valid in another
    let crossed = pipeline.select(BOB, alice.generation, 0, &cancel).await;
    assert!(matches!(
        crossed,
        Err(PipelineError::Selection(SessionError::StaleSelection))
    ));

    // Clearing one conversation leaves the other's file alone
    pipeline.clear(ALICE).await;
    assert!(pipeline.staging().resolve(&bob_file.file.identifier).await.is_ok());
}

#[tokio::test]
async fn test_selection_from_previous_shortlist_is_stale() {
    let dir = TempDir::new().unwrap();
    let pipeline = build_pipeline(&dir, ScriptedBackend::new().probe_ok("s1", abcd()), &["s1"]).await;
    let cancel = CancellationToken::new();

    let first = pipeline
        .submit(ALICE, "https://video.example/1", &cancel)
        .await
        .unwrap();
    let second = pipeline
        .submit(ALICE, "https://video.example/2", &cancel)
        .await
        .unwrap();

    let stale = pipeline.select(ALICE, first.generation, 0, &cancel).await;
    assert!(matches!(
        stale,
        Err(PipelineError::Selection(SessionError::StaleSelection))
    ));
    assert_eq!(pipeline.metrics().snapshot().stale_selections, 1);

    let fresh = pipeline
        .select(ALICE, second.generation, 0, &cancel)
        .await
        .unwrap();
    assert!(
        std::fs::read_to_string(&fresh.file.path)
            .unwrap()
            .starts_with("https://video.example/2\n")
    );
}

#[tokio::test]
async fn test_empty_shortlist_is_an_offer_not_a_failure() {
    let dir = TempDir::new().unwrap();
    let audio_only = vec![Variant::new("140", None, "m4a"), Variant::new("251", None, "webm")];
    let pipeline =
        build_pipeline(&dir, ScriptedBackend::new().probe_ok("s1", audio_only), &["s1"]).await;
    let cancel = CancellationToken::new();

    let offer = pipeline
        .submit(ALICE, "https://video.example/podcast", &cancel)
        .await
        .unwrap();

    assert!(offer.shortlist.is_empty());
    let pick = pipeline.select(ALICE, offer.generation, 0, &cancel).await;
    assert!(matches!(
        pick,
        Err(PipelineError::Selection(SessionError::StaleSelection))
    ));
}

#[tokio::test]
async fn test_delivered_link_serves_until_purged() {
    let dir = TempDir::new().unwrap();
    let pipeline = build_pipeline(&dir, ScriptedBackend::new().probe_ok("s1", abcd()), &["s1"]).await;
    let app = router(AppState::new(
        pipeline.staging().clone(),
        pipeline.metrics().clone(),
    ));
    let cancel = CancellationToken::new();

    let offer = pipeline
        .submit(ALICE, "https://video.example/a", &cancel)
        .await
        .unwrap();
    let delivery = pipeline
        .select(ALICE, offer.generation, 0, &cancel)
        .await
        .unwrap();

    let path = delivery
        .link
        .strip_prefix("https://files.example")
        .unwrap()
        .to_string();
    assert_eq!(path, format!("/files/{}", delivery.file.identifier));

    let request = || Request::builder().uri(&path).body(Body::empty()).unwrap();
    let served = app.clone().oneshot(request()).await.unwrap();
    assert_eq!(served.status(), StatusCode::OK);

    // A new link from the same conversation purges the previous file
    pipeline
        .submit(ALICE, "https://video.example/b", &cancel)
        .await
        .unwrap();

    assert!(matches!(
        pipeline.staging().resolve(&delivery.file.identifier).await,
        Err(StagingError::Gone)
    ));
    let gone = app.oneshot(request()).await.unwrap();
    assert_eq!(gone.status(), StatusCode::GONE);
}

#[tokio::test]
async fn test_shutdown_cancels_waiting_work() {
    let dir = TempDir::new().unwrap();
    let backend = ScriptedBackend::new()
        .probe_ok("s1", abcd())
        .with_delay(Duration::from_secs(30));
    let pipeline = build_pipeline(&dir, backend, &["s1"]).await;
    let cancel = CancellationToken::new();

    let task = {
        let pipeline = pipeline.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            pipeline
                .submit(ALICE, "https://video.example/slow", &cancel)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        result,
        Err(PipelineError::Extraction(ExtractionError::Cancelled))
    ));
}
