use axum::{
    extract::{multipart::MultipartRejection, Multipart, Path, RawQuery, State},
    http::StatusCode,
    routing::{delete, get, patch},
    Json, Router,
};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{info, instrument};

use super::{
    dto::{UpdateMeRequest, UpdateUser},
    repo::Users,
};
use crate::{
    auth::{handlers::auth_routes, CurrentUser, Role, User},
    crud::{self, document_body, parse_id, query_pairs},
    error::{AppError, AppJson, AppResult},
    images::services::{read_uploads, store_resized, USER_PHOTO_SIZE},
    reviews::{repo::tours_reviewed_by, services::sync_tour_ratings},
    state::AppState,
};

const ADMINS: &[Role] = &[Role::Admin];

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .merge(auth_routes())
        .route("/me", get(get_me))
        .route("/updateMe", patch(update_me))
        .route("/updateMe/photo", patch(update_my_photo))
        .route("/deleteMe", delete(delete_me))
        .route("/", get(get_all_users).post(create_user))
        .route(
            "/:id",
            get(get_user).patch(update_user).delete(delete_user),
        )
}

#[instrument(skip(state, user), fields(user_id = %user.id()))]
pub async fn get_me(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<Value>> {
    Ok(document_body(crud::find_one::<Users>(&state, user.id()).await?))
}

#[instrument(skip(state, user, payload), fields(user_id = %user.id()))]
pub async fn update_me(
    State(state): State<AppState>,
    user: CurrentUser,
    AppJson(payload): AppJson<UpdateMeRequest>,
) -> AppResult<Json<Value>> {
    let (name, email) = payload.validate()?;
    User::update_profile(&state.db, user.id(), name.as_deref(), email.as_deref()).await?;
    info!("profile updated");
    Ok(document_body(crud::find_one::<Users>(&state, user.id()).await?))
}

/// Stores the `photo` field as a 500x500 JPEG and points the profile at it.
#[instrument(skip(state, user, multipart), fields(user_id = %user.id()))]
pub async fn update_my_photo(
    State(state): State<AppState>,
    user: CurrentUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<Json<Value>> {
    let Some((_, item)) = read_uploads(multipart?, &[("photo", 1)]).await?.pop() else {
        return Err(AppError::bad_request("Please upload a photo."));
    };
    let key = format!(
        "users/user-{}-{}.jpeg",
        user.id(),
        OffsetDateTime::now_utc().unix_timestamp()
    );
    store_resized(&state, &key, item, USER_PHOTO_SIZE).await?;
    User::set_photo(&state.db, user.id(), &key).await?;
    info!(%key, "photo updated");
    Ok(document_body(crud::find_one::<Users>(&state, user.id()).await?))
}

#[instrument(skip(state, user), fields(user_id = %user.id()))]
pub async fn delete_me(State(state): State<AppState>, user: CurrentUser) -> AppResult<StatusCode> {
    User::deactivate(&state.db, user.id()).await?;
    info!("account deactivated");
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, user), fields(user_id = %user.id()))]
pub async fn get_all_users(
    State(state): State<AppState>,
    user: CurrentUser,
    RawQuery(query): RawQuery,
) -> AppResult<Json<Value>> {
    user.restrict_to(ADMINS)?;
    crud::list::<Users>(&state, query_pairs(query)?, Default::default()).await
}

pub async fn create_user() -> AppResult<Json<Value>> {
    Err(AppError::ServerFault(
        "This route is not defined! Please use /signup instead".into(),
    ))
}

#[instrument(skip(state, user), fields(user_id = %user.id()))]
pub async fn get_user(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    user.restrict_to(ADMINS)?;
    crud::get_one::<Users>(&state, &id).await
}

#[instrument(skip(state, user, payload), fields(user_id = %user.id()))]
pub async fn update_user(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    AppJson(payload): AppJson<UpdateUser>,
) -> AppResult<Json<Value>> {
    user.restrict_to(ADMINS)?;
    crud::update_one::<Users>(&state, &id, payload).await
}

/// Hard delete. The user's reviews cascade with the row, so every tour they
/// reviewed gets its rating aggregate recomputed afterwards.
async fn delete_account(state: &AppState, raw_id: &str) -> AppResult<StatusCode> {
    let id = parse_id(raw_id)?;
    let reviewed = tours_reviewed_by(&state.db, id).await?;
    let status = crud::delete_one::<Users>(state, raw_id).await?;
    for tour_id in reviewed {
        sync_tour_ratings(&state.db, tour_id).await?;
    }
    Ok(status)
}

#[instrument(skip(state, user), fields(user_id = %user.id()))]
pub async fn delete_user(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    user.restrict_to(ADMINS)?;
    delete_account(&state, &id).await
}
