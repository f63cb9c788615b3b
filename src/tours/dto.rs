use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    query::schema::parse_timestamp,
};

pub const DIFFICULTIES: [&str; 3] = ["easy", "medium", "difficult"];
pub const DEFAULT_RATING: f64 = 4.5;

/// GeoJSON point; coordinates are `[lng, lat]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(rename = "type", default = "point")]
    pub kind: String,
    pub coordinates: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn point() -> String {
    "Point".into()
}

/// A stop of the tour itinerary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(flatten)]
    pub point: GeoPoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTour {
    pub name: Option<String>,
    pub duration: Option<i32>,
    pub max_group_size: Option<i32>,
    pub difficulty: Option<String>,
    pub ratings_average: Option<f64>,
    pub ratings_quantity: Option<i32>,
    pub price: Option<f64>,
    pub price_discount: Option<f64>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub image_cover: Option<String>,
    pub images: Option<Vec<String>>,
    pub start_dates: Option<Vec<String>>,
    pub secret_tour: Option<bool>,
    pub start_location: Option<GeoPoint>,
    pub locations: Option<Vec<Location>>,
    pub guides: Option<Vec<Uuid>>,
}

/// Partial update; absent fields are left alone.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTour {
    pub name: Option<String>,
    pub duration: Option<i32>,
    pub max_group_size: Option<i32>,
    pub difficulty: Option<String>,
    pub ratings_average: Option<f64>,
    pub ratings_quantity: Option<i32>,
    pub price: Option<f64>,
    pub price_discount: Option<f64>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub image_cover: Option<String>,
    pub images: Option<Vec<String>>,
    pub start_dates: Option<Vec<String>>,
    pub secret_tour: Option<bool>,
    pub start_location: Option<GeoPoint>,
    pub locations: Option<Vec<Location>>,
    pub guides: Option<Vec<Uuid>>,
}

/// A validated tour ready for insertion.
#[derive(Debug, Clone)]
pub struct NewTour {
    pub name: String,
    pub slug: String,
    pub duration: i32,
    pub max_group_size: i32,
    pub difficulty: String,
    pub ratings_average: f64,
    pub ratings_quantity: i32,
    pub price: f64,
    pub price_discount: Option<f64>,
    pub summary: String,
    pub description: Option<String>,
    pub image_cover: String,
    pub images: Vec<String>,
    pub start_dates: Vec<OffsetDateTime>,
    pub secret_tour: bool,
    pub start_location: Option<GeoPoint>,
    pub locations: Vec<Location>,
    pub guides: Vec<Uuid>,
}

/// A validated patch. `name` and `slug` move together.
#[derive(Debug, Clone, Default)]
pub struct TourPatch {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub duration: Option<i32>,
    pub max_group_size: Option<i32>,
    pub difficulty: Option<String>,
    pub ratings_average: Option<f64>,
    pub ratings_quantity: Option<i32>,
    pub price: Option<f64>,
    pub price_discount: Option<f64>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub image_cover: Option<String>,
    pub images: Option<Vec<String>>,
    pub start_dates: Option<Vec<OffsetDateTime>>,
    pub secret_tour: Option<bool>,
    pub start_location: Option<GeoPoint>,
    pub locations: Option<Vec<Location>>,
    pub guides: Option<Vec<Uuid>>,
}

/// Lowercase words joined by hyphens: "The Sea Explorer" → "the-sea-explorer".
pub fn slugify(name: &str) -> String {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

pub fn round_rating(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn discount_message(discount: f64) -> String {
    format!("Discount price ({discount}) must be below regular price")
}

fn check_name(name: &str, errors: &mut Vec<String>) {
    let len = name.chars().count();
    if len == 0 {
        errors.push("A tour must have a name".into());
    } else if len > 40 {
        errors.push("A tour name must have less or equal than 40 characters".into());
    } else if len < 10 {
        errors.push("A tour name must have more or equal than 10 characters".into());
    }
}

fn check_difficulty(difficulty: &str, errors: &mut Vec<String>) {
    if !DIFFICULTIES.contains(&difficulty) {
        errors.push("Difficulty is either: easy, medium or difficult".into());
    }
}

fn check_rating(rating: f64, errors: &mut Vec<String>) {
    if rating < 1.0 {
        errors.push("Rating must be above 1.0".into());
    } else if rating > 5.0 {
        errors.push("Rating must be below 5.0".into());
    }
}

fn check_positive(value: i32, message: &str, errors: &mut Vec<String>) {
    if value <= 0 {
        errors.push(message.into());
    }
}

fn check_price(price: f64, errors: &mut Vec<String>) {
    if !price.is_finite() || price < 0.0 {
        errors.push("A tour price must be a positive number".into());
    }
}

fn check_point(point: &GeoPoint, errors: &mut Vec<String>) {
    let valid = point.kind == "Point"
        && matches!(point.coordinates.as_slice(),
            [lng, lat] if (-180.0..=180.0).contains(lng) && (-90.0..=90.0).contains(lat));
    if !valid {
        errors.push("Locations must be GeoJSON points with [lng, lat] coordinates".into());
    }
}

fn parse_dates(raw: Vec<String>, errors: &mut Vec<String>) -> Vec<OffsetDateTime> {
    let mut dates = Vec::with_capacity(raw.len());
    for value in raw {
        match parse_timestamp(value.trim()) {
            Some(d) => dates.push(d),
            None => errors.push(format!("Invalid startDates: {value}")),
        }
    }
    dates
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string())
}

impl CreateTour {
    pub fn validate(self) -> AppResult<NewTour> {
        let mut errors = Vec::new();

        let name = trimmed(self.name).unwrap_or_default();
        check_name(&name, &mut errors);
        let duration = self.duration.unwrap_or_else(|| {
            errors.push("A tour must have a duration".into());
            0
        });
        if self.duration.is_some() {
            check_positive(duration, "A tour duration must be positive", &mut errors);
        }
        let max_group_size = self.max_group_size.unwrap_or_else(|| {
            errors.push("A tour must have a group size".into());
            0
        });
        if self.max_group_size.is_some() {
            check_positive(max_group_size, "A tour group size must be positive", &mut errors);
        }
        let difficulty = match self.difficulty {
            Some(d) => {
                check_difficulty(&d, &mut errors);
                d
            }
            None => {
                errors.push("A tour must have a difficulty".into());
                String::new()
            }
        };
        let ratings_average = round_rating(self.ratings_average.unwrap_or(DEFAULT_RATING));
        check_rating(ratings_average, &mut errors);
        let price = match self.price {
            Some(p) => {
                check_price(p, &mut errors);
                p
            }
            None => {
                errors.push("A tour must have a price".into());
                0.0
            }
        };
        if let Some(discount) = self.price_discount {
            if self.price.is_some() && discount >= price {
                errors.push(discount_message(discount));
            }
        }
        let summary = trimmed(self.summary).unwrap_or_default();
        if summary.is_empty() {
            errors.push("A tour must have a summary".into());
        }
        let image_cover = self.image_cover.unwrap_or_default();
        if image_cover.trim().is_empty() {
            errors.push("A tour must have a cover image".into());
        }
        let start_dates = parse_dates(self.start_dates.unwrap_or_default(), &mut errors);
        if let Some(point) = &self.start_location {
            check_point(point, &mut errors);
        }
        let locations = self.locations.unwrap_or_default();
        for location in &locations {
            check_point(&location.point, &mut errors);
        }

        AppError::check_input(errors)?;
        Ok(NewTour {
            slug: slugify(&name),
            name,
            duration,
            max_group_size,
            difficulty,
            ratings_average,
            ratings_quantity: self.ratings_quantity.unwrap_or(0).max(0),
            price,
            price_discount: self.price_discount,
            summary,
            description: trimmed(self.description),
            image_cover,
            images: self.images.unwrap_or_default(),
            start_dates,
            secret_tour: self.secret_tour.unwrap_or(false),
            start_location: self.start_location,
            locations,
            guides: self.guides.unwrap_or_default(),
        })
    }
}

impl UpdateTour {
    /// Runs the validators of every field present. The discount-below-price
    /// rule needs the stored price and is checked by the repository.
    pub fn validate(self) -> AppResult<TourPatch> {
        let mut errors = Vec::new();

        let name = trimmed(self.name);
        if let Some(n) = &name {
            check_name(n, &mut errors);
        }
        if let Some(d) = self.duration {
            check_positive(d, "A tour duration must be positive", &mut errors);
        }
        if let Some(g) = self.max_group_size {
            check_positive(g, "A tour group size must be positive", &mut errors);
        }
        if let Some(d) = &self.difficulty {
            check_difficulty(d, &mut errors);
        }
        let ratings_average = self.ratings_average.map(round_rating);
        if let Some(r) = ratings_average {
            check_rating(r, &mut errors);
        }
        if let Some(p) = self.price {
            check_price(p, &mut errors);
        }
        let summary = trimmed(self.summary);
        if summary.as_deref() == Some("") {
            errors.push("A tour must have a summary".into());
        }
        if self.image_cover.as_deref().map(str::trim) == Some("") {
            errors.push("A tour must have a cover image".into());
        }
        let start_dates = self
            .start_dates
            .map(|raw| parse_dates(raw, &mut errors));
        if let Some(point) = &self.start_location {
            check_point(point, &mut errors);
        }
        for location in self.locations.iter().flatten() {
            check_point(&location.point, &mut errors);
        }

        AppError::check_input(errors)?;
        Ok(TourPatch {
            slug: name.as_deref().map(slugify),
            name,
            duration: self.duration,
            max_group_size: self.max_group_size,
            difficulty: self.difficulty,
            ratings_average,
            ratings_quantity: self.ratings_quantity.map(|q| q.max(0)),
            price: self.price,
            price_discount: self.price_discount,
            summary,
            description: trimmed(self.description),
            image_cover: self.image_cover,
            images: self.images,
            start_dates,
            secret_tour: self.secret_tour,
            start_location: self.start_location,
            locations: self.locations,
            guides: self.guides,
        })
    }
}

impl TourPatch {
    /// Checks the discount against the effective price after the patch.
    pub fn check_discount(&self, stored_price: f64, stored_discount: Option<f64>) -> AppResult<()> {
        if self.price.is_none() && self.price_discount.is_none() {
            return Ok(());
        }
        let price = self.price.unwrap_or(stored_price);
        match self.price_discount.or(stored_discount) {
            Some(discount) if discount >= price => {
                AppError::check_input(vec![discount_message(discount)])
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid() -> CreateTour {
        serde_json::from_value(json!({
            "name": "  The Sea Explorer ",
            "duration": 7,
            "maxGroupSize": 15,
            "difficulty": "medium",
            "price": 497,
            "summary": "Exploring the jaw-dropping US east coast by foot and by boat",
            "imageCover": "tour-2-cover.jpg",
            "startDates": ["2021-06-19T09:00:00Z", "2021-07-20"],
            "startLocation": {
                "type": "Point",
                "coordinates": [-80.185942, 25.774772],
                "address": "301 Biscayne Blvd, Miami, FL 33132, USA"
            },
            "locations": [{ "coordinates": [-80.128473, 25.781842], "day": 1 }]
        }))
        .unwrap()
    }

    #[test]
    fn slugify_hyphenates_lowercase_words() {
        assert_eq!(slugify("The Sea Explorer"), "the-sea-explorer");
        assert_eq!(slugify("  The  Wine-Taster!! "), "the-wine-taster");
        assert_eq!(slugify("Über Alps 2"), "über-alps-2");
    }

    #[test]
    fn rating_rounds_to_one_decimal() {
        assert_eq!(round_rating(4.666), 4.7);
        assert_eq!(round_rating(4.64), 4.6);
        assert_eq!(round_rating(5.0), 5.0);
    }

    #[test]
    fn valid_tour_is_normalized() {
        let tour = valid().validate().unwrap();
        assert_eq!(tour.name, "The Sea Explorer");
        assert_eq!(tour.slug, "the-sea-explorer");
        assert_eq!(tour.ratings_average, DEFAULT_RATING);
        assert_eq!(tour.start_dates.len(), 2);
        assert_eq!(tour.locations[0].point.kind, "Point");
        assert_eq!(tour.locations[0].day, Some(1));
        assert!(!tour.secret_tour);
    }

    #[test]
    fn missing_fields_are_all_reported() {
        let err = CreateTour::default().validate().unwrap_err();
        let msg = err.to_string();
        for expected in [
            "A tour must have a name",
            "A tour must have a duration",
            "A tour must have a group size",
            "A tour must have a difficulty",
            "A tour must have a price",
            "A tour must have a summary",
            "A tour must have a cover image",
        ] {
            assert!(msg.contains(expected), "missing {expected:?} in {msg}");
        }
    }

    #[test]
    fn field_rules() {
        let mut t = valid();
        t.name = Some("Short".into());
        t.difficulty = Some("extreme".into());
        t.ratings_average = Some(6.0);
        t.price_discount = Some(500.0);
        let msg = t.validate().unwrap_err().to_string();
        assert!(msg.contains("more or equal than 10 characters"));
        assert!(msg.contains("Difficulty is either"));
        assert!(msg.contains("Rating must be below 5.0"));
        assert!(msg.contains("Discount price (500) must be below regular price"));
    }

    #[test]
    fn bad_coordinates_are_rejected() {
        let mut t = valid();
        t.start_location = Some(GeoPoint {
            kind: "Point".into(),
            coordinates: vec![200.0, 10.0],
            address: None,
            description: None,
        });
        assert!(t.validate().is_err());
    }

    #[test]
    fn patch_renames_with_slug_and_reruns_validators() {
        let patch = UpdateTour {
            name: Some("The Snow Adventurer".into()),
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(patch.slug.as_deref(), Some("the-snow-adventurer"));

        let err = UpdateTour {
            difficulty: Some("hard".into()),
            ..Default::default()
        }
        .validate()
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn discount_checked_against_effective_price() {
        let only_discount = TourPatch {
            price_discount: Some(300.0),
            ..Default::default()
        };
        assert!(only_discount.check_discount(497.0, None).is_ok());
        assert!(only_discount.check_discount(250.0, None).is_err());

        let lower_price = TourPatch {
            price: Some(100.0),
            ..Default::default()
        };
        assert!(lower_price.check_discount(497.0, Some(150.0)).is_err());
        assert!(lower_price.check_discount(497.0, None).is_ok());
        assert!(TourPatch::default().check_discount(10.0, Some(50.0)).is_ok());
    }
}
