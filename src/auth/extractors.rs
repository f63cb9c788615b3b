use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::warn;
use uuid::Uuid;

use super::{
    jwt::{ensure_fresh, JwtKeys},
    repo::{Role, User},
    services::TOKEN_COOKIE,
};
use crate::{
    error::{AppError, AppResult},
    state::AppState,
};

const NOT_LOGGED_IN: &str = "You are not logged in! Please log in to get access.";
const USER_GONE: &str = "The user belonging to this token does no longer exist.";

/// The authenticated caller. Resolving it walks token → claims → user →
/// password freshness and rejects with 401 at the first failed step.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl CurrentUser {
    pub fn id(&self) -> Uuid {
        self.0.id
    }

    pub fn role(&self) -> Role {
        self.0.role
    }

    pub fn restrict_to(&self, roles: &[Role]) -> AppResult<()> {
        if roles.contains(&self.0.role) {
            Ok(())
        } else {
            warn!(user_id = %self.0.id, role = self.0.role.as_str(), "role not permitted");
            Err(AppError::forbidden(
                "You do not have permission to perform this action",
            ))
        }
    }
}

/// Bearer header first, then the `jwt` cookie.
fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }
    CookieJar::from_headers(headers)
        .get(TOKEN_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token =
            token_from_headers(&parts.headers).ok_or_else(|| AppError::unauthorized(NOT_LOGGED_IN))?;

        let claims = JwtKeys::from_ref(state).verify(&token).map_err(|e| {
            warn!(error = %e, "token rejected");
            AppError::from(e)
        })?;

        let user = User::find_active_by_id(&state.db, claims.sub)
            .await?
            .ok_or_else(|| {
                warn!(user_id = %claims.sub, "token for missing user");
                AppError::unauthorized(USER_GONE)
            })?;

        ensure_fresh(&claims, user.password_changed_at).map_err(|e| {
            warn!(user_id = %user.id, "token predates password change");
            AppError::from(e)
        })?;

        Ok(CurrentUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header::COOKIE, Request, StatusCode},
        routing::get,
        Router,
    };
    use time::{Duration, OffsetDateTime};
    use tower::ServiceExt;

    fn app(state: AppState) -> Router {
        Router::new()
            .route("/private", get(|_: CurrentUser| async { "ok" }))
            .with_state(state)
    }

    async fn call(state: AppState, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let res = app(state).oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn bearer_header_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, "jwt=from-cookie".parse().unwrap());
        assert_eq!(token_from_headers(&headers).as_deref(), Some("from-cookie"));
        headers.insert(AUTHORIZATION, "Bearer from-header".parse().unwrap());
        assert_eq!(token_from_headers(&headers).as_deref(), Some("from-header"));
    }

    #[test]
    fn other_schemes_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Basic dXNlcjpwYXNz".parse().unwrap());
        assert_eq!(token_from_headers(&headers), None);
    }

    #[test]
    fn role_gate() {
        let admin = CurrentUser(User::sample(Role::Admin));
        let guide = CurrentUser(User::sample(Role::Guide));
        assert!(admin.restrict_to(&[Role::Admin, Role::LeadGuide]).is_ok());
        let err = guide.restrict_to(&[Role::Admin, Role::LeadGuide]).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        assert_eq!(
            err.to_string(),
            "You do not have permission to perform this action"
        );
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let req = Request::get("/private").body(Body::empty()).unwrap();
        let (status, body) = call(AppState::fake(), req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["status"], "fail");
        assert_eq!(body["message"], NOT_LOGGED_IN);
    }

    #[tokio::test]
    async fn garbage_token_is_invalid() {
        let req = Request::get("/private")
            .header(COOKIE, "jwt=loggedout")
            .body(Body::empty())
            .unwrap();
        let (status, body) = call(AppState::fake(), req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Invalid token. Please log in again!");
    }

    #[tokio::test]
    async fn expired_token_is_reported() {
        let state = AppState::fake();
        let token = JwtKeys::from_ref(&state)
            .issue_at(Uuid::new_v4(), OffsetDateTime::now_utc() - Duration::days(1))
            .unwrap();
        let req = Request::get("/private")
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let (status, body) = call(state, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Your token has expired! Please log in again");
    }
}
