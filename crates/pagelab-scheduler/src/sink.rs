//! Result sink client.

use pagelab_core::{Error, Result};
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

/// Posts audit reports to the result sink.
#[derive(Clone)]
pub struct ResultSink {
    client: reqwest::Client,
    report_url: Url,
    referrer: String,
}

impl ResultSink {
    pub fn new(client: reqwest::Client, report_url: Url, referrer: impl Into<String>) -> Self {
        Self {
            client,
            report_url,
            referrer: referrer.into(),
        }
    }

    /// The body posted for `report`.
    pub fn payload(report: Value) -> Value {
        json!({
            "report": report,
            "artifacts": {},
            "lhr": {},
        })
    }

    /// POST `report` to the sink. Any non-success status is an error.
    pub async fn deliver(&self, report: Value) -> Result<()> {
        let body = serde_json::to_string(&Self::payload(report))?;
        let response = self
            .client
            .post(self.report_url.clone())
            .header("Content-Type", "text/plain")
            .header("Referrer", &self.referrer)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::ResultDelivery(format!("{}: {}", self.report_url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::ResultDelivery(format!(
                "{} returned {}",
                self.report_url, status
            )));
        }

        debug!(url = %self.report_url, status = %status, "Report delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    type Captured = Arc<Mutex<Vec<(HeaderMap, String)>>>;

    async fn serve(status: StatusCode) -> (Url, Captured) {
        let captured: Captured = Arc::default();
        let sink = captured.clone();
        let app = Router::new().route(
            "/collect/report/",
            post(move |headers: HeaderMap, body: String| {
                let sink = sink.clone();
                async move {
                    sink.lock().await.push((headers, body));
                    status
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let url = Url::parse(&format!("http://{}/collect/report/", addr)).unwrap();
        (url, captured)
    }

    #[test]
    fn test_payload_wraps_report() {
        let payload = ResultSink::payload(json!({"score": 0.9}));
        assert_eq!(payload["report"]["score"], 0.9);
        assert_eq!(payload["artifacts"], json!({}));
        assert_eq!(payload["lhr"], json!({}));
    }

    #[tokio::test]
    async fn test_deliver_posts_text_body_with_referrer() {
        let (url, captured) = serve(StatusCode::OK).await;
        let sink = ResultSink::new(reqwest::Client::new(), url, "https://reports.test/");

        sink.deliver(json!({"requestedUrl": "https://a.test"}))
            .await
            .unwrap();

        let captured = captured.lock().await;
        assert_eq!(captured.len(), 1);
        let (headers, body) = &captured[0];
        assert_eq!(headers["content-type"], "text/plain");
        assert_eq!(headers["referrer"], "https://reports.test/");
        let body: Value = serde_json::from_str(body).unwrap();
        assert_eq!(body["report"]["requestedUrl"], "https://a.test");
    }

    #[tokio::test]
    async fn test_error_status_is_delivery_error() {
        let (url, _captured) = serve(StatusCode::INTERNAL_SERVER_ERROR).await;
        let sink = ResultSink::new(reqwest::Client::new(), url, "https://reports.test/");

        assert!(matches!(
            sink.deliver(json!({})).await,
            Err(Error::ResultDelivery(_))
        ));
    }
}
