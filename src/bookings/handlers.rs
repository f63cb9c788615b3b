use axum::{
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use super::{
    dto::{CreateBooking, NewBooking, UpdateBooking},
    repo::{booked_tours, insert_booking, Bookings},
};
use crate::{
    auth::{CurrentUser, Role, User},
    crud::{self, list_body, parse_id, query_pairs},
    error::{AppError, AppJson, AppResult},
    payments::{CheckoutRequest, CompletedCheckout, WebhookVerifier, SIGNATURE_HEADER},
    state::AppState,
    tours::repo::TourSummary,
};

const BOOKING_MANAGERS: &[Role] = &[Role::Admin, Role::LeadGuide];
const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

pub fn booking_routes() -> Router<AppState> {
    Router::new()
        .route("/checkout-session/:tour_id", get(checkout_session))
        .route("/my", get(my_tours))
        .route("/", get(get_all_bookings).post(create_booking))
        .route(
            "/:id",
            get(get_booking).patch(update_booking).delete(delete_booking),
        )
}

fn image_url(public_url: &str, image_cover: &str) -> String {
    format!(
        "{}/img/tours/{}",
        public_url.trim_end_matches('/'),
        image_cover.rsplit('/').next().unwrap_or(image_cover)
    )
}

fn checkout_request(public_url: &str, tour: TourSummary, customer_email: String) -> CheckoutRequest {
    let base = public_url.trim_end_matches('/');
    CheckoutRequest {
        tour_id: tour.id,
        image_url: image_url(base, &tour.image_cover),
        success_url: format!("{base}/my-tours"),
        cancel_url: format!("{base}/tour/{}", tour.slug),
        tour_name: tour.name,
        summary: tour.summary,
        price: tour.price,
        customer_email,
    }
}

#[instrument(skip(state, user), fields(user_id = %user.id()))]
pub async fn checkout_session(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(tour_id): Path<String>,
) -> AppResult<Json<Value>> {
    let tour_id = parse_id(&tour_id)?;
    let tour = TourSummary::find(&state.db, tour_id)
        .await?
        .ok_or_else(AppError::no_document)?;
    let req = checkout_request(&state.config.public_url, tour, user.0.email.clone());
    let session = state.payments.create_checkout_session(&req).await?;
    info!(%tour_id, "checkout session issued");
    Ok(Json(json!({ "status": "success", "session": session })))
}

#[instrument(skip(state, user), fields(user_id = %user.id()))]
pub async fn my_tours(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<Value>> {
    let tours = booked_tours(&state.db, user.id()).await?;
    Ok(list_body(tours))
}

#[instrument(skip(state, user), fields(user_id = %user.id()))]
pub async fn get_all_bookings(
    State(state): State<AppState>,
    user: CurrentUser,
    RawQuery(query): RawQuery,
) -> AppResult<Json<Value>> {
    user.restrict_to(BOOKING_MANAGERS)?;
    crud::list::<Bookings>(&state, query_pairs(query)?, Default::default()).await
}

#[instrument(skip(state, user, payload), fields(user_id = %user.id()))]
pub async fn create_booking(
    State(state): State<AppState>,
    user: CurrentUser,
    AppJson(payload): AppJson<CreateBooking>,
) -> AppResult<(StatusCode, Json<Value>)> {
    user.restrict_to(BOOKING_MANAGERS)?;
    crud::create_one::<Bookings>(&state, payload).await
}

#[instrument(skip(state, user), fields(user_id = %user.id()))]
pub async fn get_booking(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    user.restrict_to(BOOKING_MANAGERS)?;
    crud::get_one::<Bookings>(&state, &id).await
}

#[instrument(skip(state, user, payload), fields(user_id = %user.id()))]
pub async fn update_booking(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    AppJson(payload): AppJson<UpdateBooking>,
) -> AppResult<Json<Value>> {
    user.restrict_to(BOOKING_MANAGERS)?;
    crud::update_one::<Bookings>(&state, &id, payload).await
}

#[instrument(skip(state, user), fields(user_id = %user.id()))]
pub async fn delete_booking(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    user.restrict_to(BOOKING_MANAGERS)?;
    crud::delete_one::<Bookings>(&state, &id).await
}

/// Turns a completed checkout into a paid booking at the charged price.
async fn book_from_checkout(state: &AppState, checkout: CompletedCheckout) -> AppResult<()> {
    let incomplete = || AppError::PaymentWebhook("checkout session is missing booking details".into());
    let tour_id = checkout
        .client_reference_id
        .as_deref()
        .and_then(|raw| parse_id(raw).ok())
        .ok_or_else(incomplete)?;
    let price = checkout.price().ok_or_else(incomplete)?;
    let email = checkout.customer_email.as_deref().ok_or_else(incomplete)?;
    let user = User::find_by_email(&state.db, &email.to_lowercase())
        .await?
        .ok_or_else(|| AppError::PaymentWebhook(format!("no user with email {email}")))?;

    let booking = NewBooking {
        tour_id,
        user_id: user.id,
        price,
        paid: true,
    };
    let id = insert_booking(&state.db, &booking).await?;
    info!(booking_id = %id, %tour_id, user_id = %user.id, "booking created from checkout");
    Ok(())
}

/// Provider callback. Reads the raw body so the signature covers exactly
/// what was sent.
#[instrument(skip(state, headers, body))]
pub async fn webhook_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    let event = WebhookVerifier::new(&state.config.stripe.webhook_secret)
        .verify(&body, signature)
        .map_err(|e| {
            warn!(error = %e, "webhook rejected");
            AppError::PaymentWebhook(e.to_string())
        })?;

    if event.kind == CHECKOUT_COMPLETED {
        let checkout: CompletedCheckout = serde_json::from_value(event.data.object)
            .map_err(|e| AppError::PaymentWebhook(e.to_string()))?;
        book_from_checkout(&state, checkout).await?;
    }
    Ok(Json(json!({ "received": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, routing::post};
    use time::OffsetDateTime;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn webhook_app() -> Router {
        Router::new()
            .route("/webhook-checkout", post(webhook_checkout))
            .with_state(AppState::fake())
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[test]
    fn checkout_urls_point_back_at_the_site() {
        let tour = TourSummary {
            id: Uuid::nil(),
            name: "The Forest Hiker".into(),
            slug: "the-forest-hiker".into(),
            summary: "Breathtaking hike through the Canadian Banff National Park".into(),
            image_cover: "tours/tour-1-cover.jpeg".into(),
            price: 397.0,
        };
        let req = checkout_request("http://localhost:8080/", tour, "leo@example.io".into());
        assert_eq!(req.success_url, "http://localhost:8080/my-tours");
        assert_eq!(req.cancel_url, "http://localhost:8080/tour/the-forest-hiker");
        assert_eq!(req.image_url, "http://localhost:8080/img/tours/tour-1-cover.jpeg");
        assert_eq!(req.unit_amount(), 39700);
    }

    #[tokio::test]
    async fn unsigned_webhooks_are_rejected() {
        let req = Request::post("/webhook-checkout")
            .body(Body::from(r#"{"type":"checkout.session.completed"}"#))
            .unwrap();
        let (status, body) = send(webhook_app(), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "fail");
        assert_eq!(body["message"], "Webhook error: missing signature header");
    }

    #[tokio::test]
    async fn forged_webhooks_are_rejected() {
        let payload = br#"{"type":"checkout.session.completed","data":{"object":{}}}"#;
        let header = WebhookVerifier::new("whsec_forged")
            .sign(payload, OffsetDateTime::now_utc().unix_timestamp())
            .unwrap();
        let req = Request::post("/webhook-checkout")
            .header(SIGNATURE_HEADER, header)
            .body(Body::from(payload.to_vec()))
            .unwrap();
        let (status, _) = send(webhook_app(), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn other_events_are_acknowledged() {
        let payload = br#"{"type":"payment_intent.created","data":{"object":{}}}"#;
        let header = WebhookVerifier::new("whsec_test")
            .sign(payload, OffsetDateTime::now_utc().unix_timestamp())
            .unwrap();
        let req = Request::post("/webhook-checkout")
            .header(SIGNATURE_HEADER, header)
            .body(Body::from(payload.to_vec()))
            .unwrap();
        let (status, body) = send(webhook_app(), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["received"], true);
    }

    #[tokio::test]
    async fn completed_checkout_without_reference_is_rejected() {
        let payload = br#"{"type":"checkout.session.completed","data":{"object":{"customer_email":"leo@example.io","amount_total":49700}}}"#;
        let header = WebhookVerifier::new("whsec_test")
            .sign(payload, OffsetDateTime::now_utc().unix_timestamp())
            .unwrap();
        let req = Request::post("/webhook-checkout")
            .header(SIGNATURE_HEADER, header)
            .body(Body::from(payload.to_vec()))
            .unwrap();
        let (status, body) = send(webhook_app(), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["message"],
            "Webhook error: checkout session is missing booking details"
        );
    }

    #[tokio::test]
    async fn booking_routes_need_a_login() {
        let app = booking_routes().with_state(AppState::fake());
        for uri in ["/my", "/", "/checkout-session/5c88fa8cf4afda39709c2951"] {
            let (status, _) = send(
                app.clone(),
                Request::get(uri).body(Body::empty()).unwrap(),
            )
            .await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
        }
    }
}
