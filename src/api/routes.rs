use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;

use crate::api::{handlers, middleware::transaction_boundary};
use crate::logic::context::AppContext;
use crate::model::{Answer, Choice, Entity, Question, Response, Survey};

/// Collection and item routes for one entity under `/api/v1/<endpoint>`.
fn resource<E: Entity>() -> Router<Arc<AppContext>> {
    let collection = format!("/api/v1/{}", E::end_point());
    let item = format!("{}/:id", collection);
    Router::new()
        .route(
            &collection,
            get(handlers::list::<E>).post(handlers::create::<E>),
        )
        .route(
            &item,
            get(handlers::get_by_id::<E>)
                .put(handlers::update_by_id::<E>)
                .patch(handlers::partially_update_by_id::<E>)
                .delete(handlers::delete_by_id::<E>),
        )
}

pub fn create_router(app: Arc<AppContext>) -> Router {
    let api = Router::new()
        .merge(resource::<Survey>())
        .merge(resource::<Question>())
        .merge(resource::<Choice>())
        .merge(resource::<Response>())
        .merge(resource::<Answer>())
        .route_layer(middleware::from_fn_with_state(
            app.clone(),
            transaction_boundary,
        ));

    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        .route("/api/version", get(handlers::version))
        .merge(api)
        .layer(CatchPanicLayer::new())
        .with_state(app)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::context::Settings;
    use crate::logic::hooks::{HookDispatcher, LogAuditSink};
    use crate::store::{MemoryCache, MemoryStore};
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> Arc<AppContext> {
        Arc::new(AppContext::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryCache::new()),
            HookDispatcher::spawn(8, Arc::new(LogAuditSink)),
            Settings {
                default_permissions: vec!["*".to_string()],
                ..Settings::default()
            },
        ))
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_every_entity_is_routed() {
        let router = create_router(app());
        for end_point in ["surveys", "questions", "choices", "responses", "answers"] {
            let response = router
                .clone()
                .oneshot(
                    Request::builder()
                        .uri(format!("/api/v1/{}", end_point))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{}", end_point);
            assert_eq!(json_body(response).await["count"], json!(0));
        }
    }

    #[tokio::test]
    async fn test_invalid_nested_payload_writes_nothing() {
        let router = create_router(app());

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/surveys")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"title": "T", "questions": [{"choices": []}]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error = json_body(response).await;
        assert!(error["detail"]["questions[0].question_text"].is_string());

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/v1/surveys")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(json_body(response).await["count"], json!(0));
    }

    #[tokio::test]
    async fn test_permission_header_overrides_defaults() {
        let response = create_router(app())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/questions")
                    .header("x-user-permissions", "questions.list")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            json_body(response).await["message"],
            json!("permission 'questions.create' is required")
        );
    }
}
