// Handlers module - API endpoint handlers

pub mod chat;
pub mod gems;
pub mod root;

use std::future::Future;
use std::time::Duration;

use crate::proxy::error::ApiError;

/// Bound a backend call by the configured request timeout
pub(crate) async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ApiError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ApiError::Timeout)?
}
