use axum::Router;
use axum::middleware;
use axum::routing::get;
use gatekeep_service::metric;
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use tower::ServiceBuilder;

use crate::service::RequestService;

mod cache;
mod error;
mod metrics;

pub use error::ResponseError;

use cache::get_cache_value;

pub async fn healthcheck() -> &'static str {
    metric!(counter("healthcheck") += 1);
    "ok"
}

pub fn create_app(service: RequestService) -> Router {
    // The layers here go "top to bottom" according to the reading order here.
    let layer = ServiceBuilder::new()
        .layer(NewSentryLayer::new_from_top())
        .layer(SentryHttpLayer::new().enable_transaction())
        .layer(middleware::from_fn(metrics::record_metrics));
    Router::new()
        .route("/cache", get(get_cache_value))
        .with_state(service)
        .layer(layer)
        // the healthcheck is last, as it will bypass all the middlewares
        .route("/healthcheck", get(healthcheck))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use futures::future::BoxFuture;
    use gatekeep_service::config::Config;
    use gatekeep_service::services::{ProducerError, SharedServices, ValueProducer};
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use super::*;
    use crate::endpoints::error::ApiErrorResponse;

    #[derive(Debug, Default)]
    struct CountingProducer {
        calls: AtomicUsize,
        fail: bool,
    }

    impl ValueProducer for CountingProducer {
        fn produce<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<String, ProducerError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                if self.fail {
                    Err(ProducerError::failed("backend unavailable"))
                } else {
                    Ok(format!("value-of-{key}"))
                }
            })
        }
    }

    fn app(producer: Arc<CountingProducer>) -> (Router, CancellationToken) {
        let services = SharedServices::with_producer(Config::default(), producer);
        let shutdown = CancellationToken::new();
        let service = RequestService::new(services.resolver.clone(), shutdown.clone());
        (create_app(service), shutdown)
    }

    async fn get(app: Router, uri: &str) -> Response {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        app.oneshot(request).await.unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_healthcheck() {
        let (app, _) = app(Default::default());
        let response = get(app, "/healthcheck").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "ok");
    }

    #[tokio::test]
    async fn test_missing_key() {
        let producer = Arc::new(CountingProducer::default());
        let (app, _) = app(producer.clone());

        for uri in ["/cache", "/cache?key="] {
            let response = get(app.clone(), uri).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
        assert_eq!(producer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_value() {
        let producer = Arc::new(CountingProducer::default());
        let (app, _) = app(producer.clone());

        let responses = futures::future::join_all(
            (0..5).map(|_| get(app.clone(), "/cache?key=foo")),
        )
        .await;
        for response in responses {
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_string(response).await, "value-of-foo");
        }

        let response = get(app, "/cache?key=foo").await;
        assert_eq!(body_string(response).await, "value-of-foo");
        assert_eq!(producer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_producer_failure() {
        let producer = Arc::new(CountingProducer {
            fail: true,
            ..Default::default()
        });
        let (app, _) = app(producer);

        let response = get(app, "/cache?key=foo").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body: ApiErrorResponse = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(
            body.detail.as_deref(),
            Some("failed to produce value for `foo`")
        );
        assert_eq!(body.causes, Some(vec!["backend unavailable".to_owned()]));
    }

    #[tokio::test]
    async fn test_shutdown() {
        let (app, shutdown) = app(Default::default());
        shutdown.cancel();

        let response = get(app, "/cache?key=foo").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
