use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    tours::dto::{round_rating, DEFAULT_RATING},
};

#[derive(Debug, Default, Deserialize)]
pub struct CreateReview {
    pub review: Option<String>,
    pub rating: Option<f64>,
    pub tour: Option<Uuid>,
    pub user: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateReview {
    pub review: Option<String>,
    pub rating: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewReview {
    pub review: String,
    pub rating: f64,
    pub tour_id: Uuid,
    pub user_id: Uuid,
}

fn check_rating(rating: f64, errors: &mut Vec<String>) {
    if rating < 1.0 {
        errors.push("Rating must be above 1.0".into());
    } else if rating > 5.0 {
        errors.push("Rating must be below 5.0".into());
    }
}

impl CreateReview {
    pub fn validate(self) -> AppResult<NewReview> {
        let mut errors = Vec::new();
        let review = self.review.unwrap_or_default().trim().to_string();
        if review.is_empty() {
            errors.push("Review cannot be empty!".to_string());
        }
        let rating = round_rating(self.rating.unwrap_or(DEFAULT_RATING));
        check_rating(rating, &mut errors);
        if self.user.is_none() {
            errors.push("Review must belong to a user.".into());
        }
        if self.tour.is_none() {
            errors.push("Review must belong to a tour.".into());
        }
        AppError::check_input(errors)?;
        Ok(NewReview {
            review,
            rating,
            tour_id: self.tour.unwrap_or_default(),
            user_id: self.user.unwrap_or_default(),
        })
    }
}

impl UpdateReview {
    pub fn validate(self) -> AppResult<Self> {
        let mut errors = Vec::new();
        let review = self.review.map(|r| r.trim().to_string());
        if review.as_deref() == Some("") {
            errors.push("Review cannot be empty!".to_string());
        }
        let rating = self.rating.map(round_rating);
        if let Some(r) = rating {
            check_rating(r, &mut errors);
        }
        AppError::check_input(errors)?;
        Ok(Self { review, rating })
    }
}
