use axum::{extract::FromRef, http::StatusCode, Json};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use lazy_static::lazy_static;
use regex::Regex;
use time::{Duration, OffsetDateTime};

use crate::{
    auth::{
        dto::{AuthResponse, PublicUser, UserData},
        jwt::JwtKeys,
        repo::User,
    },
    error::AppResult,
    state::AppState,
};

pub const TOKEN_COOKIE: &str = "jwt";
pub const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Field messages for a new email address; empty when it is acceptable.
pub(crate) fn email_errors(email: Option<&str>) -> Vec<String> {
    match email.map(normalize_email) {
        None => vec!["Please provide your email".into()],
        Some(e) if e.is_empty() => vec!["Please provide your email".into()],
        Some(e) if !is_valid_email(&e) => vec!["Please provide a valid email".into()],
        Some(_) => Vec::new(),
    }
}

/// Field messages for a password and its confirmation.
pub(crate) fn password_errors(password: Option<&str>, confirm: Option<&str>) -> Vec<String> {
    let mut errors = Vec::new();
    match password {
        None | Some("") => errors.push("Please provide a password".to_string()),
        Some(p) if p.chars().count() < MIN_PASSWORD_LEN => errors.push(format!(
            "Password must have at least {MIN_PASSWORD_LEN} characters"
        )),
        _ => {}
    }
    match confirm {
        None | Some("") => errors.push("Please confirm your password".to_string()),
        Some(c) if Some(c) != password => errors.push("Passwords are not the same!".to_string()),
        _ => {}
    }
    errors
}

pub(crate) fn token_cookie(token: String, ttl_days: i64, secure: bool) -> Cookie<'static> {
    Cookie::build((TOKEN_COOKIE, token))
        .http_only(true)
        .path("/")
        .secure(secure)
        .expires(OffsetDateTime::now_utc() + Duration::days(ttl_days))
        .build()
}

/// Short-lived placeholder that replaces the token cookie on logout.
pub(crate) fn logout_cookie() -> Cookie<'static> {
    Cookie::build((TOKEN_COOKIE, "loggedout"))
        .http_only(true)
        .path("/")
        .expires(OffsetDateTime::now_utc() + Duration::seconds(10))
        .build()
}

/// Issues a token for `user`, sets it as cookie and returns it in the body.
pub(crate) fn send_token(
    state: &AppState,
    jar: CookieJar,
    user: &User,
    status: StatusCode,
) -> AppResult<(StatusCode, CookieJar, Json<AuthResponse>)> {
    let keys = JwtKeys::from_ref(state);
    let token = keys.issue(user.id)?;
    let secure = !state.config.environment.is_development();
    let jar = jar.add(token_cookie(
        token.clone(),
        state.config.jwt.cookie_ttl_days,
        secure,
    ));
    Ok((
        status,
        jar,
        Json(AuthResponse {
            status: "success",
            token,
            data: UserData {
                user: PublicUser::from(user),
            },
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo::Role;

    #[test]
    fn email_validation() {
        assert!(is_valid_email("user@example.com"));
        assert!(!is_valid_email("user@example"));
        assert!(!is_valid_email("no at sign"));
        assert_eq!(normalize_email("  Jonas@Example.IO "), "jonas@example.io");
        assert!(email_errors(Some(" Jonas@Example.IO ")).is_empty());
        assert_eq!(email_errors(None), vec!["Please provide your email"]);
        assert_eq!(email_errors(Some("nope")), vec!["Please provide a valid email"]);
    }

    #[test]
    fn password_rules() {
        assert!(password_errors(Some("pass1234"), Some("pass1234")).is_empty());
        assert_eq!(
            password_errors(Some("short"), Some("short")),
            vec!["Password must have at least 8 characters"]
        );
        assert_eq!(
            password_errors(Some("pass1234"), Some("pass12345")),
            vec!["Passwords are not the same!"]
        );
        assert_eq!(password_errors(None, None).len(), 2);
    }

    #[test]
    fn cookies() {
        let cookie = token_cookie("abc".into(), 90, true);
        assert_eq!(cookie.name(), "jwt");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(logout_cookie().value(), "loggedout");
    }

    #[tokio::test]
    async fn send_token_sets_cookie_and_body() {
        let state = AppState::fake();
        let user = User::sample(Role::User);
        let (status, jar, Json(body)) =
            send_token(&state, CookieJar::new(), &user, StatusCode::CREATED).unwrap();
        assert_eq!(status, StatusCode::CREATED);
        let cookie = jar.get(TOKEN_COOKIE).expect("cookie set");
        assert_eq!(cookie.value(), body.token);
        let claims = JwtKeys::from_ref(&state).verify(&body.token).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(body.data.user.email, user.email);
    }
}
