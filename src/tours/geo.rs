use serde::Serialize;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::repo::{GUIDES_ONLY, TOUR_SCHEMA};
use crate::{
    error::{AppError, AppResult},
    query::sql::{fetch_documents, push_document},
};

/// Earth radius used for metric distances, in meters.
pub const EARTH_RADIUS_M: f64 = 6_378_100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceUnit {
    Miles,
    Kilometers,
}

impl DistanceUnit {
    pub fn parse(raw: &str) -> AppResult<Self> {
        match raw {
            "mi" => Ok(DistanceUnit::Miles),
            "km" => Ok(DistanceUnit::Kilometers),
            _ => Err(AppError::bad_request(
                "Please provide the unit as mi or km.",
            )),
        }
    }

    /// Earth radius in this unit; a distance divided by it is an angle in radians.
    pub fn earth_radius(self) -> f64 {
        match self {
            DistanceUnit::Miles => 3963.2,
            DistanceUnit::Kilometers => 6378.1,
        }
    }

    /// Factor converting meters to this unit.
    pub fn from_meters(self) -> f64 {
        match self {
            DistanceUnit::Miles => 0.000621371,
            DistanceUnit::Kilometers => 0.001,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    /// Parses `"lat,lng"`.
    pub fn parse(raw: &str) -> AppResult<Self> {
        let invalid =
            || AppError::bad_request("Please provide latitude and longitude in the format lat,lng.");
        let (lat, lng) = raw.split_once(',').ok_or_else(invalid)?;
        let lat: f64 = lat.trim().parse().map_err(|_| invalid())?;
        let lng: f64 = lng.trim().parse().map_err(|_| invalid())?;
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return Err(invalid());
        }
        Ok(Self { lat, lng })
    }
}

pub fn radius_radians(distance: f64, unit: DistanceUnit) -> f64 {
    distance / unit.earth_radius()
}

pub fn parse_distance(raw: &str) -> AppResult<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| AppError::bad_request(format!("Invalid distance: {raw}.")))
}

/// Central angle in radians between `center` and a tour's start location
/// (haversine).
fn push_angle(qb: &mut QueryBuilder<'static, Postgres>, center: LatLng) {
    const LAT: &str = "((tours.start_location->'coordinates'->>1)::float8)";
    const LNG: &str = "((tours.start_location->'coordinates'->>0)::float8)";
    qb.push("(2 * asin(LEAST(1.0, sqrt(power(sin(radians(")
        .push(LAT)
        .push(" - ")
        .push_bind(center.lat)
        .push(") / 2), 2) + cos(radians(")
        .push_bind(center.lat)
        .push(")) * cos(radians(")
        .push(LAT)
        .push(")) * power(sin(radians(")
        .push(LNG)
        .push(" - ")
        .push_bind(center.lng)
        .push(") / 2), 2)))))");
}

const LOCATED: &str =
    " FROM tours WHERE tours.secret_tour = FALSE AND tours.start_location IS NOT NULL";

pub fn within_statement(center: LatLng, radius: f64) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT ");
    push_document(&mut qb, &TOUR_SCHEMA.default_projection(), GUIDES_ONLY);
    qb.push(" AS doc").push(LOCATED).push(" AND ");
    push_angle(&mut qb, center);
    qb.push(" <= ").push_bind(radius);
    qb
}

/// Tours whose start location lies within `distance` of `center`.
pub async fn tours_within(
    db: &PgPool,
    center: LatLng,
    distance: f64,
    unit: DistanceUnit,
) -> sqlx::Result<Vec<serde_json::Value>> {
    fetch_documents(db, within_statement(center, radius_radians(distance, unit))).await
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TourDistance {
    pub id: Uuid,
    pub name: String,
    pub distance: f64,
}

pub fn distances_statement(center: LatLng, unit: DistanceUnit) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT tours.id, tours.name, ");
    push_angle(&mut qb, center);
    qb.push(" * ")
        .push_bind(EARTH_RADIUS_M * unit.from_meters())
        .push(" AS distance")
        .push(LOCATED)
        .push(" ORDER BY distance ASC");
    qb
}

/// Every located tour with its distance from `center`, nearest first.
pub async fn distances(db: &PgPool, center: LatLng, unit: DistanceUnit) -> sqlx::Result<Vec<TourDistance>> {
    distances_statement(center, unit)
        .build_query_as::<TourDistance>()
        .fetch_all(db)
        .await
}
