use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::analysis::{run_analyzer, AnalyzerResult, AnalyzerSpec};
use crate::cache::{Fingerprint, SnapshotCache};
use crate::env::Settings;
use crate::exception::{EngineError, EngineResult};
use crate::jobs::{JobHandle, JobQueue, JobState, JobStatus};
use crate::report::merge::merge_snapshots;
use crate::report::{extract_report_code, ReportSnapshot};
use crate::wcl::{Credentials, FetchRequest, GqlClient, GraphQlTransport, ReportFetcher, TokenManager};

/// One analysis request as the outer surface hands it in.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportRequest {
    /// Bare report codes or full report URLs; at least one.
    pub report_codes: Vec<String>,
    /// Case-insensitive substring match on fight name.
    #[serde(default)]
    pub fight_filter: Option<String>,
    pub analyzer: AnalyzerSpec,
    /// Bypass the cache and refetch.
    #[serde(default)]
    pub fresh: bool,
}

/// Either the finished analysis or a handle to poll.
#[derive(Debug, Clone)]
pub enum AnalyzeOutcome {
    Completed(Arc<AnalyzerResult>),
    Accepted(JobHandle),
}

/// Wires the cache, queue and fetcher into the consumer-facing API.
pub struct ReportOrchestrator {
    settings: Settings,
    cache: Arc<SnapshotCache>,
    queue: Arc<JobQueue>,
    fetcher: Arc<ReportFetcher>,
}

impl ReportOrchestrator {
    /// Production construction: reqwest transport against the configured
    /// upstream.
    pub fn new(settings: Settings) -> EngineResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.api.http_timeout_seconds))
            .build()
            .map_err(|e| EngineError::internal(format!("failed to build HTTP client: {}", e)))?;
        let tokens = Arc::new(TokenManager::new(
            http.clone(),
            &settings.api.base_url,
            Credentials {
                client_id: settings.api.client_id.clone(),
                client_secret: settings.api.client_secret.clone(),
            },
            Duration::from_secs(settings.engine.token_refresh_margin_seconds),
        ));
        let transport: Arc<dyn GraphQlTransport> =
            Arc::new(GqlClient::new(http, &settings.api.base_url, tokens));
        Ok(Self::with_transport(settings, transport))
    }

    /// Construction with an injected transport; the seam tests use.
    pub fn with_transport(settings: Settings, transport: Arc<dyn GraphQlTransport>) -> Self {
        let cache = Arc::new(SnapshotCache::new(
            settings.engine.cache_capacity,
            Duration::from_secs(settings.engine.cache_ttl_seconds),
        ));
        let queue = Arc::new(JobQueue::new(
            settings.engine.max_concurrent_reports,
            Duration::from_secs(settings.engine.job_timeout_seconds),
            Duration::from_secs(settings.engine.completed_job_ttl_seconds),
        ));
        let fetcher = Arc::new(ReportFetcher::new(
            transport,
            settings.engine.page_limit,
            settings.engine.max_inflight_per_job,
        ));
        Self {
            settings,
            cache,
            queue,
            fetcher,
        }
    }

    /// Admit one request: probe the cache synchronously, otherwise enqueue
    /// and give the job a short window to finish inline before returning a
    /// handle.
    pub async fn analyze(&self, request: ReportRequest) -> EngineResult<AnalyzeOutcome> {
        let codes = canonical_codes(&request.report_codes)?;
        request.analyzer.validate()?;

        let fight_filter = request
            .fight_filter
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned);
        let streams = request.analyzer.streams();

        if !request.fresh {
            if let Some(result) = self
                .try_cached(&codes, fight_filter.as_deref(), &streams, &request.analyzer)
                .await?
            {
                debug!("request served from cache");
                return Ok(AnalyzeOutcome::Completed(result));
            }
        }

        let mut sorted_codes = codes.clone();
        sorted_codes.sort();
        let job_fingerprint =
            Fingerprint::digest(&(&sorted_codes, &fight_filter, &request.analyzer));

        let cache = Arc::clone(&self.cache);
        let fetcher = Arc::clone(&self.fetcher);
        let analyzer = request.analyzer.clone();
        let fresh = request.fresh;
        let filter = fight_filter.clone();
        let handle = self
            .queue
            .submit(job_fingerprint, move |cancel| {
                let work: crate::jobs::JobWork = Box::pin(async move {
                    run_request(cache, fetcher, codes, filter, streams, analyzer, fresh, cancel)
                        .await
                        .map(Arc::new)
                });
                work
            })
            .await;

        let fast_window = Duration::from_millis(self.settings.engine.fast_return_threshold_ms);
        if let Some(status) = self.queue.wait(handle.id, fast_window).await {
            match status.state {
                JobState::Completed => {
                    if let Some(result) = status.result {
                        return Ok(AnalyzeOutcome::Completed(result));
                    }
                }
                JobState::Failed => {
                    return Err(self
                        .typed_job_error(handle.id)
                        .await
                        .unwrap_or_else(|| EngineError::internal("job failed without error")));
                }
                _ => {}
            }
        }

        let handle = match self.queue.status(handle.id).await {
            Some(status) => JobHandle {
                id: status.id,
                state: status.state,
                position: status.position,
            },
            None => handle,
        };
        info!(job_id = %handle.id, "request accepted as background job");
        Ok(AnalyzeOutcome::Accepted(handle))
    }

    pub async fn job_status(&self, id: Uuid) -> Option<JobStatus> {
        self.queue.status(id).await
    }

    pub async fn cancel(&self, id: Uuid) -> bool {
        self.queue.cancel(id).await
    }

    /// Inline path: if every per-code snapshot is cached and fresh, run the
    /// analyzer synchronously without creating a job.
    async fn try_cached(
        &self,
        codes: &[String],
        fight_filter: Option<&str>,
        streams: &[(crate::report::DataType, Option<u32>)],
        analyzer: &AnalyzerSpec,
    ) -> EngineResult<Option<Arc<AnalyzerResult>>> {
        let mut snapshots = Vec::with_capacity(codes.len());
        for code in codes {
            let fp = snapshot_fingerprint(code, fight_filter, streams);
            match self.cache.peek(&fp).await {
                Some(snapshot) => snapshots.push(snapshot),
                None => return Ok(None),
            }
        }
        let result = if snapshots.len() == 1 {
            run_analyzer(&snapshots[0], analyzer)?
        } else {
            let owned: Vec<ReportSnapshot> = snapshots.iter().map(|s| (**s).clone()).collect();
            run_analyzer(&merge_snapshots(&owned), analyzer)?
        };
        Ok(Some(Arc::new(result)))
    }

    async fn typed_job_error(&self, id: Uuid) -> Option<EngineError> {
        self.queue.output(id).await.and_then(|output| output.err())
    }
}

/// Validate, canonicalize and dedupe the requested report codes.
fn canonical_codes(raw: &[String]) -> EngineResult<Vec<String>> {
    if raw.is_empty() {
        return Err(EngineError::bad_request(
            "at least one report code is required",
        ));
    }
    let mut codes = Vec::with_capacity(raw.len());
    for input in raw {
        let code = extract_report_code(input)?;
        if !codes.contains(&code) {
            codes.push(code);
        }
    }
    Ok(codes)
}

/// Cache key of one report's materialized snapshot.
fn snapshot_fingerprint(
    code: &str,
    fight_filter: Option<&str>,
    streams: &[(crate::report::DataType, Option<u32>)],
) -> Fingerprint {
    let filter = fight_filter.map(str::to_lowercase);
    Fingerprint::digest(&(code, filter, streams))
}

/// The work a queue worker drives for one admitted request.
#[allow(clippy::too_many_arguments)]
async fn run_request(
    cache: Arc<SnapshotCache>,
    fetcher: Arc<ReportFetcher>,
    codes: Vec<String>,
    fight_filter: Option<String>,
    streams: Vec<(crate::report::DataType, Option<u32>)>,
    analyzer: AnalyzerSpec,
    fresh: bool,
    cancel: tokio_util::sync::CancellationToken,
) -> EngineResult<AnalyzerResult> {
    let mut snapshots = Vec::with_capacity(codes.len());
    for code in &codes {
        if cancel.is_cancelled() {
            return Err(EngineError::Canceled);
        }
        let fp = snapshot_fingerprint(code, fight_filter.as_deref(), &streams);
        let request = FetchRequest {
            code: code.clone(),
            fight_filter: fight_filter.clone(),
            streams: streams.clone(),
        };
        let fetcher = Arc::clone(&fetcher);
        let cancel = cancel.clone();
        let snapshot = cache
            .get_or_fetch(fp, fresh, move || async move {
                fetcher.fetch(&request, &cancel).await
            })
            .await?;
        snapshots.push(snapshot);
    }

    if snapshots.len() == 1 {
        run_analyzer(&snapshots[0], &analyzer)
    } else {
        let owned: Vec<ReportSnapshot> = snapshots.iter().map(|s| (**s).clone()).collect();
        run_analyzer(&merge_snapshots(&owned), &analyzer)
    }
}
