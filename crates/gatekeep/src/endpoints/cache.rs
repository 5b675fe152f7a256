use axum::extract::{Query, State};
use axum::http::StatusCode;
use serde::Deserialize;

use crate::endpoints::ResponseError;
use crate::service::RequestService;

#[derive(Debug, Deserialize)]
pub struct CacheQuery {
    #[serde(default)]
    key: String,
}

pub async fn get_cache_value(
    State(service): State<RequestService>,
    Query(query): Query<CacheQuery>,
) -> Result<String, ResponseError> {
    if query.key.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "missing `key` query parameter").into());
    }

    sentry::configure_scope(|scope| {
        scope.set_tag("cache.key", &query.key);
    });

    let value = service.resolve(&query.key).await?;
    Ok(value)
}
