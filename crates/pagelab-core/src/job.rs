//! Audit jobs.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, JobId, Result};

/// One URL awaiting audit, carried by a single queue message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Raw payload as it was enqueued. Validated by [`Job::target`].
    pub url: String,
}

impl Job {
    pub fn new(id: JobId, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
        }
    }

    /// Parse the job payload as an absolute URL with a host.
    pub fn target(&self) -> Result<Url> {
        parse_target(&self.url)
    }
}

/// Validate a URL the way workers do before handing it to the audit engine.
pub fn parse_target(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| Error::InvalidJob(format!("{:?} is not a valid URL: {}", raw, e)))?;

    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(Error::InvalidJob(format!(
            "{:?} is not an absolute URL with a host",
            raw
        )));
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_absolute_http_url() {
        let job = Job::new(JobId::new(), "https://a.test/page?x=1");
        let url = job.target().unwrap();
        assert_eq!(url.host_str(), Some("a.test"));
    }

    #[test]
    fn test_rejects_relative_url() {
        let job = Job::new(JobId::new(), "/just/a/path");
        assert!(matches!(job.target(), Err(Error::InvalidJob(_))));
    }

    #[test]
    fn test_rejects_url_without_host() {
        assert!(matches!(
            parse_target("mailto:someone@example.com"),
            Err(Error::InvalidJob(_))
        ));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_target("not a url").is_err());
        assert!(parse_target("").is_err());
    }
}
