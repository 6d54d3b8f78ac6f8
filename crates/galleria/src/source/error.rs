use thiserror::Error;

/// Errors from the external submission source.
#[derive(Error, Debug)]
pub enum SourceError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The source answered with a non-2xx status.
    #[error("Source API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Not found: {0}")]
    NotFound(String),

    /// The response body did not have the expected shape.
    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("Source credentials unavailable: {0}")]
    Credentials(#[from] crate::secrets::SecretError),

    /// Pagination did not terminate.
    #[error("Pagination exceeded {0} pages")]
    TooManyPages(usize),
}

impl SourceError {
    /// Whether retrying the same request later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(e) => e.is_timeout() || e.is_connect(),
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_statuses() {
        let throttled = SourceError::Api {
            status: 429,
            body: String::new(),
        };
        let unavailable = SourceError::Api {
            status: 503,
            body: String::new(),
        };
        let forbidden = SourceError::Api {
            status: 403,
            body: String::new(),
        };
        assert!(throttled.is_transient());
        assert!(unavailable.is_transient());
        assert!(!forbidden.is_transient());
        assert!(!SourceError::NotFound("x".to_string()).is_transient());
    }
}
