use sqlx::{types::Json, FromRow, PgPool, QueryBuilder};
use uuid::Uuid;

use super::dto::{CreateTour, NewTour, TourPatch, UpdateTour};
use crate::{
    crud::{finish_update, Resource},
    error::AppResult,
    query::{
        sql::{assign, update_statement, Scope},
        Column, FieldKind, Operation, Relation, ResourceSchema,
    },
};

pub static TOUR_SCHEMA: ResourceSchema = ResourceSchema {
    table: "tours",
    columns: &[
        Column::new("id", "tours.id", FieldKind::Uuid),
        Column::new("name", "tours.name", FieldKind::Text),
        Column::new("slug", "tours.slug", FieldKind::Text),
        Column::new("duration", "tours.duration", FieldKind::Int),
        Column::new("durationWeeks", "(tours.duration / 7.0)", FieldKind::Float),
        Column::new("maxGroupSize", "tours.max_group_size", FieldKind::Int),
        Column::new("difficulty", "tours.difficulty", FieldKind::Text),
        Column::new("ratingsAverage", "tours.ratings_average", FieldKind::Float),
        Column::new("ratingsQuantity", "tours.ratings_quantity", FieldKind::Int),
        Column::new("price", "tours.price", FieldKind::Float),
        Column::new("priceDiscount", "tours.price_discount", FieldKind::Float),
        Column::new("summary", "tours.summary", FieldKind::Text),
        Column::new("description", "tours.description", FieldKind::Text),
        Column::new("imageCover", "tours.image_cover", FieldKind::Text),
        Column::new("images", "tours.images", FieldKind::TextArray),
        Column::new("startDates", "tours.start_dates", FieldKind::TimestampArray),
        Column::new("secretTour", "tours.secret_tour", FieldKind::Bool),
        Column::new("startLocation", "tours.start_location", FieldKind::Json),
        Column::new("locations", "tours.locations", FieldKind::Json),
        Column::new("guides", "tours.guides", FieldKind::UuidArray),
        Column::new("createdAt", "tours.created_at", FieldKind::Timestamp),
        Column::new("version", "tours.version", FieldKind::Int),
    ],
    hidden: &["version"],
};

const GUIDES: Relation = Relation {
    field: "guides",
    sql: "(SELECT COALESCE(jsonb_agg(jsonb_build_object(\
          'id', g.id, 'name', g.name, 'email', g.email, 'photo', g.photo, 'role', g.role) \
          ORDER BY array_position(tours.guides, g.id)), '[]'::jsonb) \
          FROM users g WHERE g.id = ANY(tours.guides) AND g.active)",
};

const REVIEWS: Relation = Relation {
    field: "reviews",
    sql: "(SELECT COALESCE(jsonb_agg(jsonb_build_object(\
          'id', r.id, 'review', r.review, 'rating', r.rating, 'createdAt', r.created_at, \
          'tour', r.tour_id, 'user', jsonb_build_object('id', u.id, 'name', u.name, 'photo', u.photo)) \
          ORDER BY r.created_at DESC), '[]'::jsonb) \
          FROM reviews r JOIN users u ON u.id = r.user_id WHERE r.tour_id = tours.id)",
};

pub(crate) const GUIDES_ONLY: &[Relation] = &[GUIDES];
const GUIDES_AND_REVIEWS: &[Relation] = &[GUIDES, REVIEWS];

pub const SECRET_HIDDEN: &str = "tours.secret_tour = FALSE";

pub struct Tours;

#[axum::async_trait]
impl Resource for Tours {
    const NAME: &'static str = "tour";
    type Create = CreateTour;
    type Update = UpdateTour;

    fn schema() -> &'static ResourceSchema {
        &TOUR_SCHEMA
    }

    fn scope(op: Operation) -> Scope {
        match op {
            Operation::FindMany | Operation::FindOne | Operation::UpdateOne | Operation::DeleteOne => {
                Scope::new().with(SECRET_HIDDEN)
            }
        }
    }

    fn relations(op: Operation) -> &'static [Relation] {
        match op {
            Operation::FindOne => GUIDES_AND_REVIEWS,
            Operation::FindMany | Operation::UpdateOne => GUIDES_ONLY,
            Operation::DeleteOne => &[],
        }
    }

    async fn insert(db: &PgPool, input: CreateTour) -> AppResult<Uuid> {
        let tour = input.validate()?;
        Ok(insert_tour(db, &tour).await?)
    }

    async fn update(
        db: &PgPool,
        id: Uuid,
        patch: UpdateTour,
        scope: Scope,
    ) -> AppResult<Option<Uuid>> {
        let patch = patch.validate()?;
        if patch.price.is_some() || patch.price_discount.is_some() {
            let Some(stored) = TourPricing::find(db, id).await? else {
                return Ok(None);
            };
            patch.check_discount(stored.price, stored.price_discount)?;
        }
        finish_update::<Tours>(db, patch_statement(patch), id, scope).await
    }
}

async fn insert_tour(db: &PgPool, tour: &NewTour) -> sqlx::Result<Uuid> {
    sqlx::query_scalar(
        r#"
        INSERT INTO tours (
            name, slug, duration, max_group_size, difficulty, ratings_average,
            ratings_quantity, price, price_discount, summary, description, image_cover,
            images, start_dates, secret_tour, start_location, locations, guides
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        RETURNING id
        "#,
    )
    .bind(&tour.name)
    .bind(&tour.slug)
    .bind(tour.duration)
    .bind(tour.max_group_size)
    .bind(&tour.difficulty)
    .bind(tour.ratings_average)
    .bind(tour.ratings_quantity)
    .bind(tour.price)
    .bind(tour.price_discount)
    .bind(&tour.summary)
    .bind(&tour.description)
    .bind(&tour.image_cover)
    .bind(&tour.images)
    .bind(&tour.start_dates)
    .bind(tour.secret_tour)
    .bind(tour.start_location.clone().map(Json))
    .bind(Json(&tour.locations))
    .bind(&tour.guides)
    .fetch_one(db)
    .await
}

fn patch_statement(patch: TourPatch) -> QueryBuilder<'static, sqlx::Postgres> {
    let mut qb = update_statement("tours");
    assign(&mut qb, "name", patch.name);
    assign(&mut qb, "slug", patch.slug);
    assign(&mut qb, "duration", patch.duration);
    assign(&mut qb, "max_group_size", patch.max_group_size);
    assign(&mut qb, "difficulty", patch.difficulty);
    assign(&mut qb, "ratings_average", patch.ratings_average);
    assign(&mut qb, "ratings_quantity", patch.ratings_quantity);
    assign(&mut qb, "price", patch.price);
    assign(&mut qb, "price_discount", patch.price_discount);
    assign(&mut qb, "summary", patch.summary);
    assign(&mut qb, "description", patch.description);
    assign(&mut qb, "image_cover", patch.image_cover);
    assign(&mut qb, "images", patch.images);
    assign(&mut qb, "start_dates", patch.start_dates);
    assign(&mut qb, "secret_tour", patch.secret_tour);
    assign(&mut qb, "start_location", patch.start_location.map(Json));
    assign(&mut qb, "locations", patch.locations.map(Json));
    assign(&mut qb, "guides", patch.guides);
    qb
}

#[derive(Debug, FromRow)]
struct TourPricing {
    price: f64,
    price_discount: Option<f64>,
}

impl TourPricing {
    async fn find(db: &PgPool, id: Uuid) -> sqlx::Result<Option<Self>> {
        sqlx::query_as::<_, TourPricing>(
            "SELECT price, price_discount FROM tours WHERE id = $1 AND secret_tour = FALSE",
        )
        .bind(id)
        .fetch_optional(db)
        .await
    }
}

/// The fields a checkout session is priced and labelled from.
#[derive(Debug, Clone, FromRow)]
pub struct TourSummary {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub summary: String,
    pub image_cover: String,
    pub price: f64,
}

impl TourSummary {
    pub async fn find(db: &PgPool, id: Uuid) -> sqlx::Result<Option<Self>> {
        sqlx::query_as::<_, TourSummary>(
            "SELECT id, name, slug, summary, image_cover, price FROM tours \
             WHERE id = $1 AND secret_tour = FALSE",
        )
        .bind(id)
        .fetch_optional(db)
        .await
    }
}

/// Stored rating aggregate of one tour.
pub async fn set_ratings(db: &PgPool, tour_id: Uuid, quantity: i64, average: f64) -> sqlx::Result<()> {
    sqlx::query("UPDATE tours SET ratings_quantity = $2, ratings_average = $3 WHERE id = $1")
        .bind(tour_id)
        .bind(quantity as i32)
        .bind(average)
        .execute(db)
        .await?;
    Ok(())
}
