use sqlx::PgPool;
use uuid::Uuid;

use super::dto::{CreateReview, UpdateReview};
use crate::{
    crud::{finish_update, Resource},
    error::AppResult,
    query::{
        sql::{assign, update_statement, Scope},
        Column, FieldKind, Operation, Relation, ResourceSchema,
    },
};

pub static REVIEW_SCHEMA: ResourceSchema = ResourceSchema {
    table: "reviews",
    columns: &[
        Column::new("id", "reviews.id", FieldKind::Uuid),
        Column::new("review", "reviews.review", FieldKind::Text),
        Column::new("rating", "reviews.rating", FieldKind::Float),
        Column::new("tour", "reviews.tour_id", FieldKind::Uuid),
        Column::new("user", "reviews.user_id", FieldKind::Uuid),
        Column::new("createdAt", "reviews.created_at", FieldKind::Timestamp),
        Column::new("version", "reviews.version", FieldKind::Int),
    ],
    hidden: &["version"],
};

const AUTHOR: &[Relation] = &[Relation {
    field: "user",
    sql: "(SELECT jsonb_build_object('id', u.id, 'name', u.name, 'photo', u.photo) \
          FROM users u WHERE u.id = reviews.user_id)",
}];

pub struct Reviews;

#[axum::async_trait]
impl Resource for Reviews {
    const NAME: &'static str = "review";
    type Create = CreateReview;
    type Update = UpdateReview;

    fn schema() -> &'static ResourceSchema {
        &REVIEW_SCHEMA
    }

    fn relations(op: Operation) -> &'static [Relation] {
        match op {
            Operation::FindMany | Operation::FindOne | Operation::UpdateOne => AUTHOR,
            Operation::DeleteOne => &[],
        }
    }

    async fn insert(db: &PgPool, input: CreateReview) -> AppResult<Uuid> {
        let review = input.validate()?;
        let id = sqlx::query_scalar(
            "INSERT INTO reviews (review, rating, tour_id, user_id) VALUES ($1, $2, $3, $4) \
             RETURNING id",
        )
        .bind(&review.review)
        .bind(review.rating)
        .bind(review.tour_id)
        .bind(review.user_id)
        .fetch_one(db)
        .await?;
        Ok(id)
    }

    async fn update(
        db: &PgPool,
        id: Uuid,
        patch: UpdateReview,
        scope: Scope,
    ) -> AppResult<Option<Uuid>> {
        let patch = patch.validate()?;
        let mut qb = update_statement("reviews");
        assign(&mut qb, "review", patch.review);
        assign(&mut qb, "rating", patch.rating);
        finish_update::<Reviews>(db, qb, id, scope).await
    }
}

/// The tour a review belongs to.
pub async fn tour_of_review(db: &PgPool, id: Uuid) -> sqlx::Result<Option<Uuid>> {
    sqlx::query_scalar("SELECT tour_id FROM reviews WHERE id = $1")
        .bind(id)
        .fetch_optional(db)
        .await
}

/// Tours carrying at least one review by `user_id`.
pub async fn tours_reviewed_by(db: &PgPool, user_id: Uuid) -> sqlx::Result<Vec<Uuid>> {
    sqlx::query_scalar("SELECT DISTINCT tour_id FROM reviews WHERE user_id = $1")
        .bind(user_id)
        .fetch_all(db)
        .await
}
