//! Client for the external transaction classification service.
//!
//! Wire contract:
//! - `POST <classification.url>` with body `{"description": "<text>"}`
//! - `Content-Type` and `Accept` are both `application/json`
//! - `User-Agent` carries the configured client identifier
//! - a 2xx reply is a JSON object with an optional `categorie_predite`
//!   (absent or `null` means the service had no prediction)
//! - any other status is a failure; its body is diagnostic only
//!
//! A call makes exactly one attempt. Failures are returned as a
//! [`ClassificationOutcome::Failed`] value, never raised.
//!
//! Timeouts: `connect_timeout` bounds connection establishment and
//! `read_timeout` bounds each wait for data from the service. A reply
//! that keeps arriving is never cut off, there is no whole-call deadline.

use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ClassifierConfig;

/// Longest slice of an error body kept for diagnostics.
const MAX_ERROR_BODY_CHARS: usize = 500;

/// IO threads driving the client; batch workers block on them concurrently.
const RUNTIME_WORKERS: usize = 2;

// ============================================================================
// Wire types
// ============================================================================

/// Request body, built right before the call.
#[derive(Debug, Serialize)]
pub struct ClassificationRequest<'a> {
    pub description: &'a str,
}

/// Response body of a successful call.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct ClassificationResponse {
    #[serde(default)]
    pub categorie_predite: Option<String>,
}

impl ClassificationResponse {
    /// The prediction, if the service made one.
    ///
    /// An empty string counts as no prediction.
    pub fn prediction(self) -> Option<String> {
        self.categorie_predite.filter(|c| !c.is_empty())
    }
}

// ============================================================================
// Errors and outcomes
// ============================================================================

#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("failed to build HTTP client: {0}")]
    Setup(#[source] reqwest::Error),

    #[error("failed to start classifier runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("classifier timed out: {0}")]
    Timeout(#[source] reqwest::Error),

    #[error("classifier unreachable: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("classifier returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed classifier payload: {0}")]
    Payload(String),
}

impl ClassificationError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClassificationError::Timeout(err)
        } else if err.is_decode() {
            ClassificationError::Payload(err.to_string())
        } else {
            ClassificationError::Transport(err)
        }
    }

    /// Short label used in structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ClassificationError::Setup(_) | ClassificationError::Runtime(_) => "setup",
            ClassificationError::Timeout(_) => "timeout",
            ClassificationError::Transport(_) => "transport",
            ClassificationError::Status { .. } => "status",
            ClassificationError::Payload(_) => "payload",
        }
    }
}

/// Result of one classification attempt.
#[derive(Debug)]
pub enum ClassificationOutcome {
    /// The service predicted a category.
    Predicted(String),
    /// Well-formed reply without a prediction.
    Absent,
    /// Transport, protocol or payload failure.
    Failed(ClassificationError),
}

impl From<Result<Option<String>, ClassificationError>> for ClassificationOutcome {
    fn from(result: Result<Option<String>, ClassificationError>) -> Self {
        match result {
            Ok(Some(category)) => ClassificationOutcome::Predicted(category),
            Ok(None) => ClassificationOutcome::Absent,
            Err(e) => ClassificationOutcome::Failed(e),
        }
    }
}

/// Anything that can turn a description into a classification outcome.
///
/// Implementations are shared across batch workers and must not panic.
pub trait Classifier: Send + Sync {
    fn classify(&self, description: &str) -> ClassificationOutcome;
}

// ============================================================================
// HTTP classifier
// ============================================================================

/// Production classifier speaking JSON over HTTP.
///
/// The inner `reqwest` client keeps a connection pool that is reused by
/// every call, including concurrent ones. Calls block the calling thread
/// on a runtime owned by the classifier, so `classify` must not be called
/// from inside another tokio runtime.
pub struct HttpClassifier {
    http: Client,
    runtime: tokio::runtime::Runtime,
    config: ClassifierConfig,
}

impl HttpClassifier {
    pub fn new(config: ClassifierConfig) -> Result<Self, ClassificationError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(RUNTIME_WORKERS)
            .thread_name("classifier-io")
            .enable_all()
            .build()
            .map_err(ClassificationError::Runtime)?;

        // Built inside the runtime so the pool binds to its IO driver
        let http = {
            let _guard = runtime.enter();
            Client::builder()
                .connect_timeout(config.connect_timeout)
                .read_timeout(config.read_timeout)
                .user_agent(config.client_id.as_str())
                .build()
                .map_err(ClassificationError::Setup)?
        };

        tracing::info!(
            url = %config.url,
            connect_timeout_ms = config.connect_timeout.as_millis() as u64,
            read_timeout_ms = config.read_timeout.as_millis() as u64,
            client_id = %config.client_id,
            "classifier client initialized"
        );

        Ok(Self {
            http,
            runtime,
            config,
        })
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Single request/response exchange with the service.
    pub fn request(&self, description: &str) -> Result<Option<String>, ClassificationError> {
        self.runtime.block_on(self.exchange(description))
    }

    async fn exchange(&self, description: &str) -> Result<Option<String>, ClassificationError> {
        let payload = serde_json::to_vec(&ClassificationRequest { description })
            .map_err(|e| ClassificationError::Payload(format!("failed to encode request: {}", e)))?;

        let resp = self
            .http
            .post(&self.config.url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(ClassificationError::from_reqwest)?;

        let status = resp.status();

        if !status.is_success() {
            // Best effort: a missing or unreadable body is not an error of its own
            let body = resp.text().await.unwrap_or_default();
            return Err(ClassificationError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let text = resp.text().await.map_err(ClassificationError::from_reqwest)?;
        parse_response(&text).map(ClassificationResponse::prediction)
    }
}

impl Classifier for HttpClassifier {
    fn classify(&self, description: &str) -> ClassificationOutcome {
        self.request(description).into()
    }
}

/// Parse a 2xx body into the typed response.
pub fn parse_response(body: &str) -> Result<ClassificationResponse, ClassificationError> {
    let trimmed = body.trim_start_matches('\u{feff}');
    serde_json::from_str(trimmed).map_err(|e| {
        ClassificationError::Payload(format!("{} (body: {})", e, truncate_body(trimmed)))
    })
}

fn truncate_body(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        body.to_string()
    } else {
        let head: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        format!("{}…", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;
    use std::time::{Duration, Instant};

    // ── Unit tests ──────────────────────────────────────────────────

    #[test]
    fn test_request_serializes_single_field() {
        let json = serde_json::to_value(ClassificationRequest {
            description: "PAIEMENT CB CARREFOUR",
        })
        .unwrap();

        assert_eq!(json, serde_json::json!({ "description": "PAIEMENT CB CARREFOUR" }));
    }

    #[test]
    fn test_parse_response_variants() {
        assert_eq!(
            parse_response(r#"{"categorie_predite": "Groceries"}"#)
                .unwrap()
                .prediction(),
            Some("Groceries".to_string())
        );
        assert_eq!(parse_response(r#"{"categorie_predite": null}"#).unwrap().prediction(), None);
        assert_eq!(parse_response("{}").unwrap().prediction(), None);
        assert_eq!(parse_response(r#"{"categorie_predite": ""}"#).unwrap().prediction(), None);

        // Extra fields are ignored
        assert_eq!(
            parse_response(r#"{"categorie_predite": "Transport", "score": 0.91}"#)
                .unwrap()
                .prediction(),
            Some("Transport".to_string())
        );

        // BOM-prefixed replies are tolerated
        assert_eq!(
            parse_response("\u{feff}{\"categorie_predite\": \"Loyer\"}")
                .unwrap()
                .prediction(),
            Some("Loyer".to_string())
        );
    }

    #[test]
    fn test_parse_response_rejects_malformed() {
        assert!(matches!(parse_response("not json"), Err(ClassificationError::Payload(_))));
        assert!(matches!(parse_response(""), Err(ClassificationError::Payload(_))));
        assert!(matches!(parse_response("[1, 2]"), Err(ClassificationError::Payload(_))));
        assert!(matches!(
            parse_response(r#"{"categorie_predite": 12}"#),
            Err(ClassificationError::Payload(_))
        ));
    }

    #[test]
    fn test_prediction_is_verbatim() {
        let resp = parse_response(r#"{"categorie_predite": "  santé & Bien-être "}"#).unwrap();
        assert_eq!(resp.prediction(), Some("  santé & Bien-être ".to_string()));
    }

    #[test]
    fn test_truncate_body() {
        assert_eq!(truncate_body("short"), "short");

        let long = "é".repeat(MAX_ERROR_BODY_CHARS + 10);
        let truncated = truncate_body(&long);
        assert_eq!(truncated.chars().count(), MAX_ERROR_BODY_CHARS + 1);
        assert!(truncated.ends_with('…'));
    }

    #[test]
    fn test_outcome_from_result() {
        assert!(matches!(
            ClassificationOutcome::from(Ok(Some("Food".to_string()))),
            ClassificationOutcome::Predicted(ref c) if c == "Food"
        ));
        assert!(matches!(ClassificationOutcome::from(Ok(None)), ClassificationOutcome::Absent));
        assert!(matches!(
            ClassificationOutcome::from(Err(ClassificationError::Payload("x".into()))),
            ClassificationOutcome::Failed(_)
        ));
    }

    // ── httpmock tests ──────────────────────────────────────────────

    fn classifier_for(server: &MockServer) -> HttpClassifier {
        HttpClassifier::new(
            ClassifierConfig::new(server.url("/predict")).with_client_id("enrich-test/1.0"),
        )
        .unwrap()
    }

    #[test]
    fn test_request_shape() {
        let server = MockServer::start();

        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/predict")
                .header("content-type", "application/json")
                .header("accept", "application/json")
                .header("user-agent", "enrich-test/1.0")
                .json_body(serde_json::json!({ "description": "VIR SEPA LOYER" }));
            then.status(200)
                .header("content-type", "application/json")
                .json_body(serde_json::json!({ "categorie_predite": "Logement" }));
        });

        let result = classifier_for(&server).request("VIR SEPA LOYER").unwrap();

        mock.assert();
        assert_eq!(result, Some("Logement".to_string()));
    }

    #[test]
    fn test_description_sent_verbatim() {
        let server = MockServer::start();
        let description = "  Café «Le Zinc» — 日本語\ttab\n";

        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/predict")
                .json_body(serde_json::json!({ "description": description }));
            then.status(200)
                .json_body(serde_json::json!({ "categorie_predite": "Restaurants" }));
        });

        let result = classifier_for(&server).request(description).unwrap();

        mock.assert();
        assert_eq!(result, Some("Restaurants".to_string()));
    }

    #[test]
    fn test_empty_description_is_a_valid_request() {
        let server = MockServer::start();

        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/predict")
                .json_body(serde_json::json!({ "description": "" }));
            then.status(200).json_body(serde_json::json!({ "categorie_predite": null }));
        });

        let result = classifier_for(&server).request("").unwrap();

        mock.assert();
        assert_eq!(result, None);
    }

    #[test]
    fn test_server_error_carries_status_and_body() {
        let server = MockServer::start();

        let mock = server.mock(|when, then| {
            when.method(POST).path("/predict");
            then.status(500).body("model not loaded");
        });

        let err = classifier_for(&server).request("ANYTHING").unwrap_err();

        mock.assert_calls(1);
        match err {
            ClassificationError::Status { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "model not loaded");
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[test]
    fn test_error_status_without_body() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(POST).path("/predict");
            then.status(404);
        });

        let err = classifier_for(&server).request("ANYTHING").unwrap_err();

        assert!(matches!(err, ClassificationError::Status { status: 404, ref body } if body.is_empty()));
    }

    #[test]
    fn test_malformed_success_body() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(POST).path("/predict");
            then.status(200).body("<html>gateway</html>");
        });

        let err = classifier_for(&server).request("ANYTHING").unwrap_err();

        assert!(matches!(err, ClassificationError::Payload(_)), "got {:?}", err);
        assert_eq!(err.kind(), "payload");
    }

    #[test]
    fn test_connection_refused() {
        // Grab a free port, then close it so nothing is listening
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let classifier = HttpClassifier::new(ClassifierConfig::new(format!(
            "http://127.0.0.1:{}/predict",
            port
        )))
        .unwrap();

        let outcome = classifier.classify("ANYTHING");

        match outcome {
            ClassificationOutcome::Failed(err) => {
                assert!(matches!(err, ClassificationError::Transport(_)), "got {:?}", err)
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_read_timeout() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(POST).path("/predict");
            then.status(200)
                .delay(Duration::from_secs(3))
                .json_body(serde_json::json!({ "categorie_predite": "Late" }));
        });

        let classifier = HttpClassifier::new(
            ClassifierConfig::new(server.url("/predict"))
                .with_read_timeout(Duration::from_millis(300)),
        )
        .unwrap();

        let started = Instant::now();
        let err = classifier.request("SLOW").unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, ClassificationError::Timeout(_)), "got {:?}", err);
        assert!(
            elapsed < Duration::from_secs(2),
            "call returned after {:?}",
            elapsed
        );
    }

    /// Serve one request, answering with `body` in `chunk`-byte pieces `gap` apart
    fn trickle_server(body: &'static str, chunk: usize, gap: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();

            // Drain request head and body so the client sees a clean exchange
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            let head_end = loop {
                let n = stream.read(&mut buf).unwrap();
                request.extend_from_slice(&buf[..n]);
                if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
                if n == 0 {
                    return;
                }
            };
            let head = String::from_utf8_lossy(&request[..head_end]).to_lowercase();
            let content_length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            while request.len() - head_end < content_length {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }

            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(header.as_bytes()).unwrap();
            stream.flush().unwrap();

            for piece in body.as_bytes().chunks(chunk) {
                thread::sleep(gap);
                if stream.write_all(piece).is_err() {
                    return;
                }
                let _ = stream.flush();
            }
        });

        format!("http://{}/predict", addr)
    }

    #[test]
    fn test_read_timeout_applies_per_read() {
        // 34 bytes in 7-byte pieces: ~750ms in total, never more than 150ms of silence
        let url = trickle_server(
            r#"{"categorie_predite": "Groceries"}"#,
            7,
            Duration::from_millis(150),
        );

        let classifier = HttpClassifier::new(
            ClassifierConfig::new(url).with_read_timeout(Duration::from_millis(500)),
        )
        .unwrap();

        let result = classifier.request("CB CARREFOUR").unwrap();

        assert_eq!(result, Some("Groceries".to_string()));
    }
}
