use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, PmtaApiError>;

#[derive(Debug, Error)]
pub enum PmtaApiError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{endpoint} returned HTTP {status}")]
    Status { endpoint: String, status: u16 },
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::DeError),
}

impl PmtaApiError {
    pub fn status(endpoint: impl Into<String>, status: u16) -> Self {
        Self::Status {
            endpoint: endpoint.into(),
            status,
        }
    }
}
