mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use raidlens::analysis::{AnalyzerSpec, HitConfig, PhaseOneConfig};
use raidlens::cache::{Fingerprint, SnapshotCache};
use raidlens::env::{ApiSettings, EngineSettings, Settings};
use raidlens::exception::EngineError;
use raidlens::jobs::JobState;
use raidlens::orchestrator::{AnalyzeOutcome, ReportOrchestrator, ReportRequest};
use raidlens::wcl::{FetchRequest, GraphQlTransport, ReportFetcher};
use raidlens::report::DataType;

// ============================================================
// Scripted transport
// ============================================================

struct MockTransport {
    overview_calls: AtomicUsize,
    page_calls: AtomicUsize,
    delay: Duration,
    report_missing: bool,
}

impl MockTransport {
    fn new(delay: Duration) -> Self {
        Self {
            overview_calls: AtomicUsize::new(0),
            page_calls: AtomicUsize::new(0),
            delay,
            report_missing: false,
        }
    }

    fn missing_report() -> Self {
        Self {
            report_missing: true,
            ..Self::new(Duration::ZERO)
        }
    }

    fn overview(&self) -> Value {
        json!({
            "reportData": {
                "report": {
                    "title": "Weekly Raid",
                    "startTime": 0,
                    "endTime": 1_000_000,
                    "masterData": {
                        "actors": [
                            {"id": 1, "name": "PlayerA", "type": "Player",
                             "subType": "Mage", "icon": "Mage-Frost", "specs": ["Frost"]}
                        ],
                        "abilities": []
                    },
                    "fights": [
                        {"id": 1, "name": "Nexus-King Salhadaar", "boss": 3134,
                         "startTime": 0, "endTime": 10_000, "kill": false,
                         "phaseTransitions": []}
                    ]
                }
            }
        })
    }
}

#[async_trait]
impl GraphQlTransport for MockTransport {
    async fn execute(&self, query: &'static str, _variables: Value) -> Result<Value, EngineError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if query.contains("ReportOverview") {
            self.overview_calls.fetch_add(1, Ordering::SeqCst);
            if self.report_missing {
                return Ok(json!({ "reportData": { "report": null } }));
            }
            Ok(self.overview())
        } else {
            self.page_calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({
                "reportData": {
                    "report": {
                        "events": {
                            "data": [
                                {"timestamp": 5_000, "type": "damage", "sourceID": -1,
                                 "targetID": 1, "abilityGameID": 1_227_472, "amount": 100.0}
                            ],
                            "nextPageTimestamp": null
                        }
                    }
                }
            }))
        }
    }
}

fn test_settings(fast_return_ms: u64) -> Settings {
    Settings {
        api: ApiSettings {
            client_id: "test-client".into(),
            client_secret: "test-secret".into(),
            base_url: "http://127.0.0.1:0".into(),
            http_timeout_seconds: 5,
        },
        engine: EngineSettings {
            max_concurrent_reports: 2,
            fast_return_threshold_ms: fast_return_ms,
            ..EngineSettings::default()
        },
        logging: Default::default(),
    }
}

fn hits_request(codes: &[&str]) -> ReportRequest {
    ReportRequest {
        report_codes: codes.iter().map(|c| c.to_string()).collect(),
        fight_filter: None,
        analyzer: AnalyzerSpec::Hits(HitConfig {
            ability_id: 1_227_472,
            ..HitConfig::default()
        }),
        fresh: false,
    }
}

// ============================================================
// Cache single-flight
// ============================================================

#[tokio::test]
async fn concurrent_misses_share_one_fetch() {
    let cache = Arc::new(SnapshotCache::new(8, Duration::from_secs(60)));
    let calls = Arc::new(AtomicUsize::new(0));
    let fp = Fingerprint::digest(&("ABC", "fight", 1));

    let mut handles = Vec::new();
    for _ in 0..5 {
        let cache = Arc::clone(&cache);
        let calls = Arc::clone(&calls);
        let fp = fp.clone();
        handles.push(tokio::spawn(async move {
            cache
                .get_or_fetch(fp, false, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(common::snapshot("ABC", vec![], vec![], vec![]))
                })
                .await
        }));
    }

    let snapshots: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for snapshot in &snapshots[1..] {
        assert!(Arc::ptr_eq(snapshot, &snapshots[0]));
    }
}

#[tokio::test]
async fn errors_are_shared_but_never_cached() {
    let cache = Arc::new(SnapshotCache::new(8, Duration::from_secs(60)));
    let calls = Arc::new(AtomicUsize::new(0));
    let fp = Fingerprint::digest(&"broken");

    let attempt = {
        let calls = Arc::clone(&calls);
        cache
            .get_or_fetch(fp.clone(), false, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::UpstreamUnavailable("boom".into()))
            })
            .await
    };
    assert!(attempt.is_err());
    assert!(cache.is_empty().await);

    // A later call runs the fetch again instead of serving the error.
    let retry = {
        let calls = Arc::clone(&calls);
        cache
            .get_or_fetch(fp, false, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(common::snapshot("ABC", vec![], vec![], vec![]))
            })
            .await
    };
    assert!(retry.is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn lru_eviction_keeps_capacity_bound() {
    let cache = SnapshotCache::new(2, Duration::from_secs(60));
    for code in ["AAA", "BBB", "CCC"] {
        let fp = Fingerprint::digest(&code);
        cache
            .get_or_fetch(fp, false, || async {
                Ok(common::snapshot(code, vec![], vec![], vec![]))
            })
            .await
            .unwrap();
    }
    assert_eq!(cache.len().await, 2);
    // The oldest entry was evicted.
    assert!(cache.peek(&Fingerprint::digest(&"AAA")).await.is_none());
    assert!(cache.peek(&Fingerprint::digest(&"CCC")).await.is_some());
}

// ============================================================
// Orchestrator admission
// ============================================================

#[tokio::test]
async fn identical_requests_issue_one_upstream_fetch() {
    let transport = Arc::new(MockTransport::new(Duration::from_millis(10)));
    let orchestrator = Arc::new(ReportOrchestrator::with_transport(
        test_settings(2_000),
        transport.clone(),
    ));

    let mut handles = Vec::new();
    for _ in 0..5 {
        let orchestrator = Arc::clone(&orchestrator);
        handles.push(tokio::spawn(async move {
            orchestrator.analyze(hits_request(&["ABC123"])).await
        }));
    }

    let mut serialized = Vec::new();
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            AnalyzeOutcome::Completed(result) => {
                serialized.push(serde_json::to_string(&*result).unwrap());
            }
            AnalyzeOutcome::Accepted(_) => panic!("expected inline completion"),
        }
    }

    assert_eq!(transport.overview_calls.load(Ordering::SeqCst), 1);
    for result in &serialized[1..] {
        assert_eq!(result, &serialized[0]);
    }
}

#[tokio::test]
async fn queue_reports_fifo_positions() {
    let transport = Arc::new(MockTransport::new(Duration::from_millis(300)));
    let orchestrator = Arc::new(ReportOrchestrator::with_transport(
        test_settings(0),
        transport,
    ));

    let codes = ["AAAAA1", "BBBBB2", "CCCCC3", "DDDDD4", "EEEEE5"];
    let mut handles = Vec::new();
    for code in codes {
        match orchestrator.analyze(hits_request(&[code])).await.unwrap() {
            AnalyzeOutcome::Accepted(handle) => handles.push(handle),
            AnalyzeOutcome::Completed(_) => panic!("jobs should not finish inline"),
        }
    }

    // Give the two workers time to pick up the head of the queue.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut positions = Vec::new();
    for handle in &handles {
        let status = orchestrator.job_status(handle.id).await.unwrap();
        positions.push(status.position);
    }
    assert_eq!(
        positions,
        vec![Some(0), Some(0), Some(1), Some(2), Some(3)]
    );

    // Admission order is preserved: earlier jobs never sit behind later ones.
    for pair in handles.windows(2) {
        let first = orchestrator.job_status(pair[0].id).await.unwrap();
        let second = orchestrator.job_status(pair[1].id).await.unwrap();
        let rank = |status: &raidlens::jobs::JobStatus| match status.state {
            JobState::Completed | JobState::Failed => 0,
            JobState::Running => 1,
            JobState::Queued => 2,
        };
        assert!(rank(&first) <= rank(&second));
    }
}

#[tokio::test]
async fn fresh_requests_bypass_and_rewrite_cache() {
    let transport = Arc::new(MockTransport::new(Duration::ZERO));
    let orchestrator =
        ReportOrchestrator::with_transport(test_settings(2_000), transport.clone());

    let warm = orchestrator.analyze(hits_request(&["ABC123"])).await.unwrap();
    assert!(matches!(warm, AnalyzeOutcome::Completed(_)));
    assert_eq!(transport.overview_calls.load(Ordering::SeqCst), 1);

    // Cached: no new upstream call.
    orchestrator.analyze(hits_request(&["ABC123"])).await.unwrap();
    assert_eq!(transport.overview_calls.load(Ordering::SeqCst), 1);

    // fresh=true refetches.
    let mut request = hits_request(&["ABC123"]);
    request.fresh = true;
    orchestrator.analyze(request).await.unwrap();
    assert_eq!(transport.overview_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn canceling_a_queued_job_fails_it() {
    let transport = Arc::new(MockTransport::new(Duration::from_millis(400)));
    let orchestrator = ReportOrchestrator::with_transport(test_settings(0), transport);

    let mut handles = Vec::new();
    for code in ["AAAAA1", "BBBBB2", "CCCCC3"] {
        match orchestrator.analyze(hits_request(&[code])).await.unwrap() {
            AnalyzeOutcome::Accepted(handle) => handles.push(handle),
            AnalyzeOutcome::Completed(_) => panic!("jobs should not finish inline"),
        }
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    // With two workers the third job is still queued.
    let victim = handles[2].id;
    assert!(orchestrator.cancel(victim).await);

    let status = orchestrator.job_status(victim).await.unwrap();
    assert_eq!(status.state, JobState::Failed);
    assert!(status.error.unwrap().contains("canceled"));
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_any_job() {
    let transport = Arc::new(MockTransport::new(Duration::ZERO));
    let orchestrator =
        ReportOrchestrator::with_transport(test_settings(1_000), transport.clone());

    let empty = ReportRequest {
        report_codes: vec![],
        fight_filter: None,
        analyzer: AnalyzerSpec::Hits(HitConfig::default()),
        fresh: false,
    };
    assert!(matches!(
        orchestrator.analyze(empty).await,
        Err(EngineError::BadRequest(_))
    ));

    assert!(matches!(
        orchestrator.analyze(hits_request(&["not a code!"])).await,
        Err(EngineError::BadRequest(_))
    ));

    let invalid_window = ReportRequest {
        report_codes: vec!["ABC123".into()],
        fight_filter: None,
        analyzer: AnalyzerSpec::Phase1Mechanics(PhaseOneConfig {
            early_mass_window_s: Some(30),
            ..PhaseOneConfig::default()
        }),
        fresh: false,
    };
    assert!(matches!(
        orchestrator.analyze(invalid_window).await,
        Err(EngineError::BadRequest(_))
    ));

    assert_eq!(transport.overview_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn report_urls_are_canonicalized_before_fetching() {
    let transport = Arc::new(MockTransport::new(Duration::ZERO));
    let orchestrator =
        ReportOrchestrator::with_transport(test_settings(2_000), transport.clone());

    let url_request = hits_request(&["https://www.warcraftlogs.com/reports/ABC123?fight=last"]);
    orchestrator.analyze(url_request).await.unwrap();
    // The same report under its bare code is already cached.
    orchestrator.analyze(hits_request(&["ABC123"])).await.unwrap();
    assert_eq!(transport.overview_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_reports_surface_as_report_not_found() {
    let transport = Arc::new(MockTransport::missing_report());
    let orchestrator = ReportOrchestrator::with_transport(test_settings(2_000), transport);

    let outcome = orchestrator.analyze(hits_request(&["ZZZ999"])).await;
    assert!(matches!(
        outcome,
        Err(EngineError::ReportNotFound { .. })
    ));
}

#[tokio::test]
async fn unknown_job_ids_have_no_status() {
    let transport = Arc::new(MockTransport::new(Duration::ZERO));
    let orchestrator = ReportOrchestrator::with_transport(test_settings(0), transport);
    assert!(orchestrator.job_status(uuid::Uuid::new_v4()).await.is_none());
}

// ============================================================
// Fetcher behavior against scripted pages
// ============================================================

struct StallingTransport;

#[async_trait]
impl GraphQlTransport for StallingTransport {
    async fn execute(&self, query: &'static str, _variables: Value) -> Result<Value, EngineError> {
        if query.contains("ReportOverview") {
            Ok(MockTransport::new(Duration::ZERO).overview())
        } else {
            // nextPageTimestamp never advances.
            Ok(json!({
                "reportData": {
                    "report": {
                        "events": { "data": [], "nextPageTimestamp": 5_000 }
                    }
                }
            }))
        }
    }
}

#[tokio::test]
async fn stalled_pagination_is_detected() {
    let fetcher = ReportFetcher::new(Arc::new(StallingTransport), 100, 2);
    let request = FetchRequest {
        code: "ABC123".into(),
        fight_filter: None,
        streams: vec![(DataType::DamageTaken, None)],
    };
    let result = fetcher.fetch(&request, &CancellationToken::new()).await;
    assert!(matches!(
        result,
        Err(EngineError::PaginationStalled { .. })
    ));
}

#[tokio::test]
async fn canceled_fetch_stops_between_pages() {
    let transport = Arc::new(MockTransport::new(Duration::ZERO));
    let fetcher = ReportFetcher::new(transport, 100, 2);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let request = FetchRequest {
        code: "ABC123".into(),
        fight_filter: None,
        streams: vec![(DataType::DamageTaken, None)],
    };
    let result = fetcher.fetch(&request, &cancel).await;
    assert!(matches!(result, Err(EngineError::Canceled)));
}
