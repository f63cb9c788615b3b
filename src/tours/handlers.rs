use axum::{
    extract::{multipart::MultipartRejection, Multipart, Path, RawQuery, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use time::OffsetDateTime;
use tracing::{info, instrument};

use super::{
    dto::{CreateTour, UpdateTour},
    geo::{self, DistanceUnit, LatLng},
    repo::Tours,
    reports,
};
use crate::{
    auth::{CurrentUser, Role},
    crud::{self, parse_id, query_pairs},
    error::{AppError, AppJson, AppResult},
    images::services::{read_uploads, store_resized, TOUR_IMAGE_SIZE},
    reviews::handlers::{create_review_for_tour, list_reviews_for_tour},
    state::AppState,
};

const TOUR_EDITORS: &[Role] = &[Role::Admin, Role::LeadGuide];
const TOUR_PLANNERS: &[Role] = &[Role::Admin, Role::LeadGuide, Role::Guide];
const MAX_TOUR_IMAGES: usize = 3;

pub fn tour_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_all_tours).post(create_tour))
        .route("/top-5-cheap", get(top_five_cheap))
        .route("/tour-stats", get(tour_stats))
        .route("/monthly-plan/:year", get(monthly_plan))
        .route(
            "/tours-within/:distance/center/:latlng/unit/:unit",
            get(tours_within),
        )
        .route("/distances/:latlng/unit/:unit", get(distances))
        .route(
            "/:id",
            get(get_tour).patch(update_tour).delete(delete_tour),
        )
        .route("/:id/images", axum::routing::patch(upload_tour_images))
        .route(
            "/:id/reviews",
            get(list_reviews_for_tour).post(create_review_for_tour),
        )
}

/// Query pairs with the top-five preset replacing any client-provided
/// limit, sort or fields.
fn top_five_params(mut params: Vec<(String, String)>) -> Vec<(String, String)> {
    params.retain(|(k, _)| !matches!(k.as_str(), "limit" | "sort" | "fields"));
    params.push(("limit".into(), "5".into()));
    params.push(("sort".into(), "-ratingsAverage,price".into()));
    params.push((
        "fields".into(),
        "name,price,ratingsAverage,summary,difficulty".into(),
    ));
    params
}

#[instrument(skip(state))]
pub async fn get_all_tours(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> AppResult<Json<Value>> {
    crud::list::<Tours>(&state, query_pairs(query)?, Default::default()).await
}

#[instrument(skip(state))]
pub async fn top_five_cheap(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> AppResult<Json<Value>> {
    crud::list::<Tours>(&state, top_five_params(query_pairs(query)?), Default::default()).await
}

#[instrument(skip(state))]
pub async fn get_tour(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<Value>> {
    crud::get_one::<Tours>(&state, &id).await
}

#[instrument(skip(state, user, payload), fields(user_id = %user.id()))]
pub async fn create_tour(
    State(state): State<AppState>,
    user: CurrentUser,
    AppJson(payload): AppJson<CreateTour>,
) -> AppResult<(StatusCode, Json<Value>)> {
    user.restrict_to(TOUR_EDITORS)?;
    crud::create_one::<Tours>(&state, payload).await
}

#[instrument(skip(state, user, payload), fields(user_id = %user.id()))]
pub async fn update_tour(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    AppJson(payload): AppJson<UpdateTour>,
) -> AppResult<Json<Value>> {
    user.restrict_to(TOUR_EDITORS)?;
    crud::update_one::<Tours>(&state, &id, payload).await
}

#[instrument(skip(state, user), fields(user_id = %user.id()))]
pub async fn delete_tour(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    user.restrict_to(TOUR_EDITORS)?;
    crud::delete_one::<Tours>(&state, &id).await
}

/// `imageCover` (one file) and `images` (up to three) are resized to
/// 2000x1333 JPEGs and stored; the tour then points at the new keys.
#[instrument(skip(state, user, multipart), fields(user_id = %user.id()))]
pub async fn upload_tour_images(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(raw_id): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<Json<Value>> {
    user.restrict_to(TOUR_EDITORS)?;
    let id = parse_id(&raw_id)?;
    crud::find_one::<Tours>(&state, id).await?;

    let uploads = read_uploads(
        multipart?,
        &[("imageCover", 1), ("images", MAX_TOUR_IMAGES)],
    )
    .await?;
    if uploads.is_empty() {
        return Err(AppError::bad_request("Please upload imageCover and/or images."));
    }

    let stamp = OffsetDateTime::now_utc().unix_timestamp();
    let mut patch = UpdateTour::default();
    let mut images = Vec::new();
    for (field, item) in uploads {
        let key = if field == "imageCover" {
            format!("tours/tour-{id}-{stamp}-cover.jpeg")
        } else {
            format!("tours/tour-{id}-{stamp}-{}.jpeg", images.len() + 1)
        };
        store_resized(&state, &key, item, TOUR_IMAGE_SIZE).await?;
        if field == "imageCover" {
            patch.image_cover = Some(key);
        } else {
            images.push(key);
        }
    }
    if !images.is_empty() {
        patch.images = Some(images);
    }

    info!(tour_id = %id, "tour images uploaded");
    crud::update_one::<Tours>(&state, &raw_id, patch).await
}

#[instrument(skip(state))]
pub async fn tour_stats(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let stats = reports::difficulty_stats(&state.db).await?;
    Ok(Json(json!({ "status": "success", "data": { "stats": stats } })))
}

#[instrument(skip(state, user), fields(user_id = %user.id()))]
pub async fn monthly_plan(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(year): Path<String>,
) -> AppResult<Json<Value>> {
    user.restrict_to(TOUR_PLANNERS)?;
    let year = reports::parse_year(&year)?;
    let plan = reports::monthly_plan(&state.db, year).await?;
    Ok(Json(json!({ "status": "success", "data": { "plan": plan } })))
}

#[instrument(skip(state))]
pub async fn tours_within(
    State(state): State<AppState>,
    Path((distance, latlng, unit)): Path<(String, String, String)>,
) -> AppResult<Json<Value>> {
    let center = LatLng::parse(&latlng)?;
    let unit = DistanceUnit::parse(&unit)?;
    let distance = geo::parse_distance(&distance)?;
    let tours = geo::tours_within(&state.db, center, distance, unit).await?;
    Ok(Json(json!({
        "status": "success",
        "results": tours.len(),
        "data": { "data": tours },
    })))
}

#[instrument(skip(state))]
pub async fn distances(
    State(state): State<AppState>,
    Path((latlng, unit)): Path<(String, String)>,
) -> AppResult<Json<Value>> {
    let center = LatLng::parse(&latlng)?;
    let unit = DistanceUnit::parse(&unit)?;
    let distances = geo::distances(&state.db, center, unit).await?;
    Ok(Json(json!({ "status": "success", "data": { "data": distances } })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    #[test]
    fn top_five_overrides_client_paging() {
        let params = top_five_params(vec![
            ("limit".into(), "50".into()),
            ("difficulty".into(), "easy".into()),
        ]);
        assert!(params.contains(&("difficulty".into(), "easy".into())));
        assert!(!params.contains(&("limit".into(), "50".into())));
        assert!(params.contains(&("limit".into(), "5".into())));
    }

    async fn get(uri: &str) -> (StatusCode, Value) {
        let app = tour_routes().with_state(AppState::fake());
        let res = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn bad_filters_fail_before_the_database() {
        let (status, body) = get("/?price=abc").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid price: abc.");

        let (status, body) = get("/?sort=nope").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid field: nope");
    }

    #[tokio::test]
    async fn malformed_ids_and_coordinates_are_rejected() {
        let (status, body) = get("/not-a-uuid").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid id: not-a-uuid.");

        let (status, body) = get("/distances/34.1/unit/mi").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["message"],
            "Please provide latitude and longitude in the format lat,lng."
        );

        let (status, _) = get("/tours-within/200/center/34.1,-118.1/unit/parsecs").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn writes_need_a_login() {
        let app = tour_routes().with_state(AppState::fake());
        let res = app
            .oneshot(
                Request::delete(format!("/{}", uuid::Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }
}
