use serde::Deserialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

#[derive(Debug, Default, Deserialize)]
pub struct CreateBooking {
    pub tour: Option<Uuid>,
    pub user: Option<Uuid>,
    pub price: Option<f64>,
    pub paid: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateBooking {
    pub price: Option<f64>,
    pub paid: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewBooking {
    pub tour_id: Uuid,
    pub user_id: Uuid,
    pub price: f64,
    pub paid: bool,
}

fn check_price(price: f64, errors: &mut Vec<String>) {
    if !price.is_finite() || price < 0.0 {
        errors.push("Price must be a positive amount.".into());
    }
}

impl CreateBooking {
    pub fn validate(self) -> AppResult<NewBooking> {
        let mut errors = Vec::new();
        if self.tour.is_none() {
            errors.push("Booking must belong to a Tour!".to_string());
        }
        if self.user.is_none() {
            errors.push("Booking must belong to a User!".to_string());
        }
        match self.price {
            None => errors.push("Booking must have a price.".to_string()),
            Some(p) => check_price(p, &mut errors),
        }
        AppError::check_input(errors)?;
        Ok(NewBooking {
            tour_id: self.tour.unwrap_or_default(),
            user_id: self.user.unwrap_or_default(),
            price: self.price.unwrap_or_default(),
            paid: self.paid.unwrap_or(true),
        })
    }
}

impl UpdateBooking {
    pub fn validate(self) -> AppResult<Self> {
        let mut errors = Vec::new();
        if let Some(p) = self.price {
            check_price(p, &mut errors);
        }
        AppError::check_input(errors)?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn booking_needs_tour_user_and_price() {
        let msg = CreateBooking::default().validate().unwrap_err().to_string();
        assert!(msg.starts_with("Invalid input data."));
        assert!(msg.contains("Booking must belong to a Tour!"));
        assert!(msg.contains("Booking must belong to a User!"));
        assert!(msg.contains("Booking must have a price."));
    }

    #[test]
    fn paid_defaults_to_true() {
        let booking = CreateBooking {
            tour: Some(Uuid::new_v4()),
            user: Some(Uuid::new_v4()),
            price: Some(497.0),
            paid: None,
        }
        .validate()
        .unwrap();
        assert!(booking.paid);
        assert_eq!(booking.price, 497.0);
    }

    #[test]
    fn negative_prices_are_rejected() {
        let err = UpdateBooking {
            price: Some(-1.0),
            paid: None,
        }
        .validate()
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
