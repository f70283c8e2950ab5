use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("server answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request failed: {0}")]
    Http(String),

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("token unavailable: {0}")]
    Token(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Http(e.to_string())
        }
    }
}
