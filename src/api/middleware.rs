use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::logic::context::{AppContext, TxOutcome};
use crate::model::UserContext;

/// Wrap every API request in one [`RequestContext`]: handlers find it in the
/// request extensions, and the response decides commit or rollback.
pub async fn transaction_boundary(
    State(app): State<Arc<AppContext>>,
    user: UserContext,
    mut request: Request,
    next: Next,
) -> Response {
    let ctx = Arc::new(app.begin_request(user));
    request.extensions_mut().insert(ctx.clone());

    let response = next.run(request).await;
    let outcome = outcome_of(&response);

    match ctx.finish(outcome).await {
        Ok(()) => response,
        Err(err) => {
            log::error!("failed to finish request transaction: {}", err);
            err.into_response()
        }
    }
}

/// An explicit marker wins; otherwise success and redirect statuses commit.
pub fn outcome_of(response: &Response) -> TxOutcome {
    if let Some(outcome) = response.extensions().get::<TxOutcome>() {
        return *outcome;
    }
    let status = response.status();
    if status.is_success() || status.is_redirection() {
        TxOutcome::Commit
    } else {
        TxOutcome::Rollback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use axum::http::StatusCode;

    #[test]
    fn test_outcome_follows_status() {
        assert_eq!(outcome_of(&StatusCode::OK.into_response()), TxOutcome::Commit);
        assert_eq!(outcome_of(&StatusCode::CREATED.into_response()), TxOutcome::Commit);
        assert_eq!(
            outcome_of(&StatusCode::SEE_OTHER.into_response()),
            TxOutcome::Commit
        );
        assert_eq!(
            outcome_of(&StatusCode::UNPROCESSABLE_ENTITY.into_response()),
            TxOutcome::Rollback
        );
    }

    #[test]
    fn test_error_marker_wins() {
        let response = AppError::BadRequest("bad".to_string()).into_response();
        assert_eq!(outcome_of(&response), TxOutcome::Rollback);

        let mut response = StatusCode::OK.into_response();
        response.extensions_mut().insert(TxOutcome::Rollback);
        assert_eq!(outcome_of(&response), TxOutcome::Rollback);
    }
}
