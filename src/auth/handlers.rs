use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde_json::{json, Value};
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{
            AuthResponse, ForgotPasswordRequest, LoginRequest, ResetPasswordRequest,
            SignupRequest, UpdatePasswordRequest,
        },
        extractors::CurrentUser,
        password::{hash_password, verify_password},
        repo::User,
        reset::{self, ResetCode},
        services::{email_errors, logout_cookie, normalize_email, password_errors, send_token},
    },
    error::{AppError, AppJson, AppResult},
    mail::Email,
    state::AppState,
};

const RESET_REJECTED: &str = "Token is invalid or has expired";

type TokenReply = (StatusCode, CookieJar, Json<AuthResponse>);

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/logout", get(logout))
        .route("/forgotPassword", post(forgot_password))
        .route("/resetPassword/:code", patch(reset_password))
        .route("/updateMyPassword", patch(update_password))
}

#[instrument(skip(state, jar, payload))]
pub async fn signup(
    State(state): State<AppState>,
    jar: CookieJar,
    AppJson(payload): AppJson<SignupRequest>,
) -> AppResult<TokenReply> {
    let name = payload.name.as_deref().map(str::trim).unwrap_or_default();
    let mut errors = Vec::new();
    if name.is_empty() {
        errors.push("Please tell us your name!".to_string());
    }
    errors.extend(email_errors(payload.email.as_deref()));
    errors.extend(password_errors(
        payload.password.as_deref(),
        payload.password_confirm.as_deref(),
    ));
    AppError::check_input(errors)?;

    let email = normalize_email(payload.email.as_deref().unwrap_or_default());
    let hash = hash_password(
        payload.password.as_deref().unwrap_or_default(),
        &state.config.password,
    )?;
    let user = User::create(&state.db, name, &email, &hash).await?;

    let url = format!("{}/api/v1/users/me", state.config.public_url);
    if let Err(e) = state
        .mailer
        .send(Email::welcome(&user.name, &user.email, &url))
        .await
    {
        warn!(error = %e, user_id = %user.id, "welcome email failed");
    }

    info!(user_id = %user.id, email = %user.email, "user signed up");
    send_token(&state, jar, &user, StatusCode::CREATED)
}

#[instrument(skip(state, jar, payload))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    AppJson(payload): AppJson<LoginRequest>,
) -> AppResult<TokenReply> {
    let (Some(email), Some(password)) = (payload.email, payload.password) else {
        return Err(AppError::bad_request("Please provide email and password!"));
    };
    let email = normalize_email(&email);

    let user = match User::find_by_email(&state.db, &email).await? {
        Some(u) if verify_password(&password, &u.password_hash)? => u,
        _ => {
            warn!(%email, "login rejected");
            return Err(AppError::unauthorized("Incorrect email or password"));
        }
    };

    info!(user_id = %user.id, "user logged in");
    send_token(&state, jar, &user, StatusCode::OK)
}

pub async fn logout(jar: CookieJar) -> (CookieJar, Json<Value>) {
    (jar.add(logout_cookie()), Json(json!({ "status": "success" })))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    AppJson(payload): AppJson<ForgotPasswordRequest>,
) -> AppResult<Json<Value>> {
    let email = normalize_email(payload.email.as_deref().unwrap_or_default());
    let user = User::find_by_email(&state.db, &email)
        .await?
        .ok_or_else(|| AppError::not_found("There is no user with that email address."))?;

    let code = ResetCode::issue();
    User::set_reset_code(&state.db, user.id, &code).await?;

    let url = format!(
        "{}/api/v1/users/resetPassword/{}",
        state.config.public_url, code.plaintext
    );
    if let Err(e) = state
        .mailer
        .send(Email::password_reset(&user.name, &user.email, &url))
        .await
    {
        warn!(error = %e, user_id = %user.id, "reset email failed");
        User::clear_reset_code(&state.db, user.id).await?;
        return Err(AppError::ServerFault(
            "There was an error sending the email. Try again later!".into(),
        ));
    }

    info!(user_id = %user.id, "reset code issued");
    Ok(Json(json!({
        "status": "success",
        "message": "Token sent to email!",
    })))
}

#[instrument(skip(state, jar, code, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(code): Path<String>,
    AppJson(payload): AppJson<ResetPasswordRequest>,
) -> AppResult<TokenReply> {
    let now = OffsetDateTime::now_utc();
    let digest = ResetCode::digest(&code);
    let user = User::find_by_reset_hash(&state.db, &digest)
        .await?
        .filter(|u| {
            reset::accepts(
                u.password_reset_hash.as_deref(),
                u.password_reset_expires,
                &code,
                now,
            )
        })
        .ok_or_else(|| AppError::bad_request(RESET_REJECTED))?;

    AppError::check_input(password_errors(
        payload.password.as_deref(),
        payload.password_confirm.as_deref(),
    ))?;
    let hash = hash_password(
        payload.password.as_deref().unwrap_or_default(),
        &state.config.password,
    )?;
    let user = User::redeem_reset_code(&state.db, user.id, &digest, &hash, OffsetDateTime::now_utc())
        .await?
        .ok_or_else(|| AppError::bad_request(RESET_REJECTED))?;

    info!(user_id = %user.id, "password reset");
    send_token(&state, jar, &user, StatusCode::OK)
}

#[instrument(skip(state, jar, current, payload), fields(user_id = %current.id()))]
pub async fn update_password(
    State(state): State<AppState>,
    jar: CookieJar,
    current: CurrentUser,
    AppJson(payload): AppJson<UpdatePasswordRequest>,
) -> AppResult<TokenReply> {
    let CurrentUser(user) = current;
    let presented = payload.password_current.unwrap_or_default();
    if !verify_password(&presented, &user.password_hash)? {
        warn!(user_id = %user.id, "current password mismatch");
        return Err(AppError::unauthorized("Your current password is wrong."));
    }

    AppError::check_input(password_errors(
        payload.password.as_deref(),
        payload.password_confirm.as_deref(),
    ))?;
    let hash = hash_password(
        payload.password.as_deref().unwrap_or_default(),
        &state.config.password,
    )?;
    let user = User::set_password(&state.db, user.id, &hash, OffsetDateTime::now_utc()).await?;

    info!(user_id = %user.id, "password updated");
    send_token(&state, jar, &user, StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    async fn send(req: Request<Body>) -> (StatusCode, Value) {
        let app = auth_routes().with_state(AppState::fake());
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn login_requires_both_fields() {
        let (status, body) = send(post_json("/login", json!({ "email": "a@b.io" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Please provide email and password!");
    }

    #[tokio::test]
    async fn signup_validates_before_touching_the_store() {
        let (status, body) = send(post_json(
            "/signup",
            json!({
                "name": "Jonas",
                "email": "not-an-email",
                "password": "pass1234",
                "passwordConfirm": "pass4321",
            }),
        ))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let msg = body["message"].as_str().unwrap();
        assert!(msg.starts_with("Invalid input data."));
        assert!(msg.contains("Please provide a valid email"));
        assert!(msg.contains("Passwords are not the same!"));
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let req = Request::post("/login")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "fail");
    }

    #[tokio::test]
    async fn logout_replaces_cookie() {
        let app = auth_routes().with_state(AppState::fake());
        let res = app
            .oneshot(Request::get("/logout").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let cookie = res
            .headers()
            .get("set-cookie")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        assert!(cookie.starts_with("jwt=loggedout"));
    }
}
