//! Shared HTTP client for the job source and the result sink.

use pagelab_core::{Error, Result};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the client used for outbound calls.
///
/// With `insecure_tls` the client accepts self-signed certificates.
pub fn client(insecure_tls: bool) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .danger_accept_invalid_certs(insecure_tls)
        .build()
        .map_err(|e| Error::Internal(format!("http client: {}", e)))
}
