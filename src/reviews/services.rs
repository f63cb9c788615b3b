use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::{
    error::AppResult,
    tours::{
        dto::{round_rating, DEFAULT_RATING},
        repo::set_ratings,
    },
};

/// Derived rating aggregate of one tour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatingsSummary {
    pub quantity: i64,
    pub average: f64,
}

impl RatingsSummary {
    /// No reviews resets the tour to the default average.
    pub fn from_stats(count: i64, average: Option<f64>) -> Self {
        match average {
            Some(avg) if count > 0 => Self {
                quantity: count,
                average: round_rating(avg),
            },
            _ => Self {
                quantity: 0,
                average: DEFAULT_RATING,
            },
        }
    }
}

/// Recomputes count and average of a tour's reviews and stores them on the tour.
pub async fn sync_tour_ratings(db: &PgPool, tour_id: Uuid) -> AppResult<RatingsSummary> {
    let (count, average): (i64, Option<f64>) =
        sqlx::query_as("SELECT COUNT(*), AVG(rating) FROM reviews WHERE tour_id = $1")
            .bind(tour_id)
            .fetch_one(db)
            .await?;
    let summary = RatingsSummary::from_stats(count, average);
    set_ratings(db, tour_id, summary.quantity, summary.average).await?;
    debug!(%tour_id, quantity = summary.quantity, average = summary.average, "tour ratings synced");
    Ok(summary)
}
