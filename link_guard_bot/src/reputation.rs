use std::{fmt::Display, future::Future, time::Duration};

use reqwest::Client;
use serde::Deserialize;
use tokio::time::{sleep, Instant};

/// What the reputation service thinks of a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Scan finished and no engine flagged it.
    Clean,
    /// This many engines flagged it.
    Malicious { engines: u32 },
    /// No usable answer: no API key, service error, or the scan didn't
    /// finish in time.
    Unknown,
}

impl Verdict {
    #[must_use]
    pub fn is_malicious(&self) -> bool {
        matches!(self, Verdict::Malicious { engines } if *engines > 0)
    }

    /// Number of engines that flagged the URL.
    #[must_use]
    pub fn score(&self) -> u32 {
        match self {
            Verdict::Malicious { engines } => *engines,
            Verdict::Clean | Verdict::Unknown => 0,
        }
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Clean => write!(f, "Link is safe"),
            Verdict::Malicious { engines } => {
                write!(f, "Threat detected ({engines} engines flagged it)")
            }
            Verdict::Unknown => write!(f, "Could not be verified"),
        }
    }
}

/// Result of checking one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    /// The URL as it was submitted, see [`normalize_url`].
    pub url: String,
    pub verdict: Verdict,
}

impl ScanReport {
    #[must_use]
    pub fn is_malicious(&self) -> bool {
        self.verdict.is_malicious()
    }
}

/// Something that can tell if a URL is malicious.
pub trait Scanner {
    /// Never fails: anything that goes wrong ends up as [`Verdict::Unknown`].
    fn scan(&self, url: &str) -> impl Future<Output = ScanReport> + Send;
}

/// Prefix `http://` to the URL if it has no `http://` or `https://` scheme.
#[must_use]
pub fn normalize_url(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{url}")
    }
}

/// How long to wait for a submitted scan to finish.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    /// Wait before the first poll.
    pub initial_delay: Duration,
    /// Wait between the first and second poll. Doubles after every poll.
    pub first_interval: Duration,
    pub max_interval: Duration,
    /// Give up this long after submitting.
    pub deadline: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy {
            initial_delay: Duration::from_secs(1),
            first_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(4),
            deadline: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ScanError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("submission response has no analysis ID")]
    NoAnalysisId,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct Submission {
    id: Option<String>,
}

#[derive(Deserialize)]
struct Analysis {
    #[serde(default)]
    attributes: AnalysisAttributes,
}

#[derive(Deserialize, Default)]
struct AnalysisAttributes {
    /// "queued", "in-progress" or "completed".
    #[serde(default)]
    status: String,
    #[serde(default)]
    stats: AnalysisStats,
}

#[derive(Deserialize, Default)]
struct AnalysisStats {
    #[serde(default)]
    malicious: u32,
}

/// Client for the VirusTotal v3 API.
///
/// See <https://docs.virustotal.com/reference/scan-url> and
/// <https://docs.virustotal.com/reference/analysis>.
pub struct VirusTotal {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    policy: PollPolicy,
}

impl VirusTotal {
    /// With no `api_key`, every scan is [`Verdict::Unknown`].
    ///
    /// # Errors
    /// Errors if the HTTP client can't be built, i.e. TLS backend failure.
    pub fn new(
        api_key: Option<String>,
        base_url: impl Into<String>,
        policy: PollPolicy,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .connect_timeout(Duration::from_secs(7))
            .build()?;

        Ok(VirusTotal {
            client,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            policy,
        })
    }

    async fn submit(&self, api_key: &str, url: &str) -> Result<String, ScanError> {
        let submission: Envelope<Submission> = self
            .client
            .post(format!("{}/urls", self.base_url))
            .header("x-apikey", api_key)
            .form(&[("url", url)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        submission.data.id.ok_or(ScanError::NoAnalysisId)
    }

    async fn fetch_analysis(
        &self,
        api_key: &str,
        analysis_id: &str,
    ) -> Result<AnalysisAttributes, ScanError> {
        let analysis: Envelope<Analysis> = self
            .client
            .get(format!("{}/analyses/{}", self.base_url, analysis_id))
            .header("x-apikey", api_key)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(analysis.data.attributes)
    }

    async fn submit_and_poll(&self, api_key: &str, url: &str) -> Result<Verdict, ScanError> {
        let deadline = Instant::now() + self.policy.deadline;

        let analysis_id = self.submit(api_key, url).await?;
        log::debug!("Submitted {url} for scanning as {analysis_id}");

        sleep(self.policy.initial_delay).await;

        let mut interval = self.policy.first_interval;
        loop {
            let analysis = self.fetch_analysis(api_key, &analysis_id).await?;

            // A positive is a positive, even from a scan that's still going.
            if analysis.stats.malicious > 0 {
                return Ok(Verdict::Malicious {
                    engines: analysis.stats.malicious,
                });
            }
            if analysis.status == "completed" {
                return Ok(Verdict::Clean);
            }

            let now = Instant::now();
            if now >= deadline {
                log::warn!(
                    "Scan of {url} still \"{}\" at the deadline, giving up",
                    analysis.status
                );
                return Ok(Verdict::Unknown);
            }

            log::debug!("Scan of {url} is \"{}\", waiting...", analysis.status);
            sleep(interval.min(deadline - now)).await;
            interval = (interval * 2).min(self.policy.max_interval);
        }
    }
}

impl Scanner for VirusTotal {
    async fn scan(&self, url: &str) -> ScanReport {
        let url = normalize_url(url);

        let Some(api_key) = &self.api_key else {
            log::warn!("No VirusTotal API key, can't check {url}");
            return ScanReport {
                url,
                verdict: Verdict::Unknown,
            };
        };

        let verdict = match self.submit_and_poll(api_key, &url).await {
            Ok(verdict) => verdict,
            Err(e) => {
                log::error!("VirusTotal error while checking {url}: {e}");
                Verdict::Unknown
            }
        };

        log::debug!("Checked {url} and got: {verdict:?}");

        ScanReport { url, verdict }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use axum::{
        extract::{Path, State},
        http::{HeaderMap, StatusCode},
        routing::{get, post},
        Json, Router,
    };
    use serde_json::{json, Value};

    use super::*;

    const KEY: &str = "test-key";

    fn fast_policy() -> PollPolicy {
        PollPolicy {
            initial_delay: Duration::from_millis(5),
            first_interval: Duration::from_millis(5),
            max_interval: Duration::from_millis(20),
            deadline: Duration::from_millis(300),
        }
    }

    /// Serve `router` on a random local port and return its base URL.
    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{address}")
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers.get("x-apikey").and_then(|v| v.to_str().ok()) == Some(KEY)
    }

    async fn submit_ok(headers: HeaderMap) -> Result<Json<Value>, StatusCode> {
        if !authorized(&headers) {
            return Err(StatusCode::UNAUTHORIZED);
        }
        Ok(Json(json!({ "data": { "type": "analysis", "id": "an-1" } })))
    }

    /// Stub service where the analysis reports `status` and `malicious`
    /// after `ready_after` polls, and "queued" before that.
    fn stub(ready_after: usize, status: &'static str, malicious: u32) -> (Router, Arc<AtomicUsize>) {
        let polls = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route("/urls", post(submit_ok))
            .route(
                "/analyses/{id}",
                get(
                    move |State(polls): State<Arc<AtomicUsize>>,
                          Path(id): Path<String>,
                          headers: HeaderMap| async move {
                        if !authorized(&headers) || id != "an-1" {
                            return Err(StatusCode::NOT_FOUND);
                        }
                        let poll = polls.fetch_add(1, Ordering::SeqCst) + 1;
                        let body = if poll >= ready_after {
                            json!({ "data": { "attributes": {
                                "status": status,
                                "stats": { "malicious": malicious, "harmless": 60 }
                            } } })
                        } else {
                            json!({ "data": { "attributes": {
                                "status": "queued",
                                "stats": { "malicious": 0 }
                            } } })
                        };
                        Ok(Json(body))
                    },
                ),
            )
            .with_state(polls.clone());
        (router, polls)
    }

    #[tokio::test]
    async fn malicious_url() {
        let (router, polls) = stub(1, "completed", 3);
        let base = serve(router).await;
        let vt = VirusTotal::new(Some(KEY.to_string()), base, fast_policy()).unwrap();

        let report = vt.scan("https://evil.test/login").await;
        assert_eq!(report.url, "https://evil.test/login");
        assert_eq!(report.verdict, Verdict::Malicious { engines: 3 });
        assert!(report.is_malicious());
        assert_eq!(report.verdict.score(), 3);
        assert_eq!(polls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn waits_for_scan_to_complete() {
        let (router, polls) = stub(3, "completed", 0);
        let base = serve(router).await;
        let vt = VirusTotal::new(Some(KEY.to_string()), base, fast_policy()).unwrap();

        let report = vt.scan("example.com").await;
        assert_eq!(report.url, "http://example.com");
        assert_eq!(report.verdict, Verdict::Clean);
        assert!(!report.is_malicious());
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unfinished_scan_is_unknown() {
        let (router, _polls) = stub(usize::MAX, "completed", 0);
        let base = serve(router).await;
        let vt = VirusTotal::new(Some(KEY.to_string()), base, fast_policy()).unwrap();

        let report = vt.scan("https://slow.test").await;
        assert_eq!(report.verdict, Verdict::Unknown);
        assert_eq!(report.verdict.score(), 0);
    }

    #[tokio::test]
    async fn analysis_server_error_is_unknown() {
        let router = Router::new()
            .route("/urls", post(submit_ok))
            .route(
                "/analyses/{id}",
                get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
            );
        let base = serve(router).await;
        let vt = VirusTotal::new(Some(KEY.to_string()), base, fast_policy()).unwrap();

        let report = vt.scan("https://evil.test").await;
        assert_eq!(report.verdict, Verdict::Unknown);
        assert!(!report.is_malicious());
        assert_eq!(report.verdict.score(), 0);
    }

    #[tokio::test]
    async fn rejected_submission_is_unknown() {
        let polls = Arc::new(AtomicUsize::new(0));
        let polls_in_handler = polls.clone();
        let router = Router::new()
            .route("/urls", post(|| async { StatusCode::TOO_MANY_REQUESTS }))
            .route(
                "/analyses/{id}",
                get(move || async move {
                    polls_in_handler.fetch_add(1, Ordering::SeqCst);
                    StatusCode::OK
                }),
            );
        let base = serve(router).await;
        let vt = VirusTotal::new(Some(KEY.to_string()), base, fast_policy()).unwrap();

        let report = vt.scan("https://evil.test").await;
        assert_eq!(report.verdict, Verdict::Unknown);
        assert_eq!(polls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_analysis_id_is_unknown() {
        let router = Router::new().route(
            "/urls",
            post(|| async { Json(json!({ "data": { "type": "analysis" } })) }),
        );
        let base = serve(router).await;
        let vt = VirusTotal::new(Some(KEY.to_string()), base, fast_policy()).unwrap();

        assert_eq!(vt.scan("https://a.test").await.verdict, Verdict::Unknown);
    }

    #[tokio::test]
    async fn no_api_key_is_unknown_without_network() {
        // Nothing listens on the discard port, which doesn't matter
        // because nothing should be sent.
        let vt = VirusTotal::new(None, "http://127.0.0.1:9", fast_policy()).unwrap();

        let report = vt.scan("https://evil.test").await;
        assert_eq!(report.verdict, Verdict::Unknown);
    }

    #[test]
    fn normalizing_urls() {
        assert_eq!(normalize_url("https://a.test/x"), "https://a.test/x");
        assert_eq!(normalize_url("http://a.test"), "http://a.test");
        assert_eq!(normalize_url("a.test/x"), "http://a.test/x");
    }

    #[test]
    fn verdict_texts() {
        assert_eq!(Verdict::Clean.to_string(), "Link is safe");
        assert_eq!(
            Verdict::Malicious { engines: 2 }.to_string(),
            "Threat detected (2 engines flagged it)"
        );
        assert_eq!(Verdict::Unknown.to_string(), "Could not be verified");
        assert!(!Verdict::Malicious { engines: 0 }.is_malicious());
    }
}
