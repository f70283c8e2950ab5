use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::error::TransportError;

type TokenFn = dyn Fn() -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync;

/// Source of the bearer token sent with CONNECT. Dynamic providers run again
/// before every connection attempt, so a refreshed token is picked up on
/// reconnect.
#[derive(Clone)]
pub enum TokenProvider {
    Static(String),
    Dynamic(Arc<TokenFn>),
}

impl TokenProvider {
    pub fn dynamic<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        TokenProvider::Dynamic(Arc::new(move || Box::pin(f())))
    }

    pub async fn resolve(&self) -> Result<String, TransportError> {
        match self {
            TokenProvider::Static(token) => Ok(token.clone()),
            TokenProvider::Dynamic(f) => f().await.map_err(|e| TransportError::Token(e.to_string())),
        }
    }
}

impl fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenProvider::Static(_) => f.write_str("TokenProvider::Static(<redacted>)"),
            TokenProvider::Dynamic(_) => f.write_str("TokenProvider::Dynamic"),
        }
    }
}

impl From<String> for TokenProvider {
    fn from(token: String) -> Self {
        TokenProvider::Static(token)
    }
}

impl From<&str> for TokenProvider {
    fn from(token: &str) -> Self {
        TokenProvider::Static(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn dynamic_provider_runs_each_time() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let provider = TokenProvider::dynamic(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(format!("token-{}", n)) }
        });
        assert_eq!(provider.resolve().await.unwrap(), "token-1");
        assert_eq!(provider.resolve().await.unwrap(), "token-2");
    }

    #[tokio::test]
    async fn failure_maps_to_token_error() {
        let provider = TokenProvider::dynamic(|| async { Err::<String, _>(anyhow::anyhow!("refresh expired")) });
        let err = provider.resolve().await.unwrap_err();
        assert!(matches!(err, TransportError::Token(msg) if msg.contains("refresh expired")));
    }

    #[test]
    fn debug_hides_static_token() {
        let provider = TokenProvider::from("s3cret");
        assert!(!format!("{:?}", provider).contains("s3cret"));
    }
}
