use axum::{
    extract::{Path, RawQuery, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde_json::Value;
use tracing::instrument;
use uuid::Uuid;

use super::{
    dto::{CreateReview, UpdateReview},
    repo::{tour_of_review, Reviews},
    services::sync_tour_ratings,
};
use crate::{
    auth::{CurrentUser, Role},
    crud::{self, parse_id, query_pairs},
    error::{AppError, AppJson, AppResult},
    query::{sql::Scope, FilterValue},
    state::AppState,
};

const REVIEW_EDITORS: &[Role] = &[Role::User, Role::Admin];

pub fn review_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_reviews).post(create_review))
        .route(
            "/:id",
            get(get_review).patch(update_review).delete(delete_review),
        )
}

#[instrument(skip(state, _user))]
pub async fn list_reviews(
    State(state): State<AppState>,
    _user: CurrentUser,
    RawQuery(query): RawQuery,
) -> AppResult<Json<Value>> {
    crud::list::<Reviews>(&state, query_pairs(query)?, Scope::new()).await
}

/// Reviews of one tour (`/tours/:id/reviews`).
#[instrument(skip(state, _user))]
pub async fn list_reviews_for_tour(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(tour_id): Path<String>,
    RawQuery(query): RawQuery,
) -> AppResult<Json<Value>> {
    let tour_id = parse_id(&tour_id)?;
    let parent = Scope::new().eq("reviews.tour_id", FilterValue::Uuid(tour_id));
    crud::list::<Reviews>(&state, query_pairs(query)?, parent).await
}

async fn create_and_sync(
    state: &AppState,
    user: &CurrentUser,
    mut input: CreateReview,
) -> AppResult<(StatusCode, Json<Value>)> {
    user.restrict_to(&[Role::User])?;
    input.user = Some(user.id());
    let tour_id = input.tour;
    let created = crud::create_one::<Reviews>(state, input).await?;
    if let Some(tour_id) = tour_id {
        sync_tour_ratings(&state.db, tour_id).await?;
    }
    Ok(created)
}

#[instrument(skip(state, user, payload), fields(user_id = %user.id()))]
pub async fn create_review(
    State(state): State<AppState>,
    user: CurrentUser,
    AppJson(payload): AppJson<CreateReview>,
) -> AppResult<(StatusCode, Json<Value>)> {
    create_and_sync(&state, &user, payload).await
}

/// The tour comes from the path when nested under `/tours/:id/reviews`.
#[instrument(skip(state, user, payload), fields(user_id = %user.id()))]
pub async fn create_review_for_tour(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(tour_id): Path<String>,
    AppJson(mut payload): AppJson<CreateReview>,
) -> AppResult<(StatusCode, Json<Value>)> {
    payload.tour = Some(parse_id(&tour_id)?);
    create_and_sync(&state, &user, payload).await
}

#[instrument(skip(state, _user))]
pub async fn get_review(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    crud::get_one::<Reviews>(&state, &id).await
}

async fn owning_tour(state: &AppState, raw_id: &str) -> AppResult<Uuid> {
    let id = parse_id(raw_id)?;
    tour_of_review(&state.db, id)
        .await?
        .ok_or_else(AppError::no_document)
}

#[instrument(skip(state, user, payload), fields(user_id = %user.id()))]
pub async fn update_review(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    AppJson(payload): AppJson<UpdateReview>,
) -> AppResult<Json<Value>> {
    user.restrict_to(REVIEW_EDITORS)?;
    let tour_id = owning_tour(&state, &id).await?;
    let updated = crud::update_one::<Reviews>(&state, &id, payload).await?;
    sync_tour_ratings(&state.db, tour_id).await?;
    Ok(updated)
}

#[instrument(skip(state, user), fields(user_id = %user.id()))]
pub async fn delete_review(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    user.restrict_to(REVIEW_EDITORS)?;
    let tour_id = owning_tour(&state, &id).await?;
    let status = crud::delete_one::<Reviews>(&state, &id).await?;
    sync_tour_ratings(&state.db, tour_id).await?;
    Ok(status)
}
