use serde_json::Value;
use sqlx::{PgPool, QueryBuilder};
use uuid::Uuid;

use super::dto::{CreateBooking, NewBooking, UpdateBooking};
use crate::{
    crud::{finish_update, Resource},
    error::AppResult,
    query::{
        sql::{assign, fetch_documents, push_document, update_statement, Scope},
        Column, FieldKind, Operation, QuerySpec, Relation, ResourceSchema,
    },
    tours::repo::{GUIDES_ONLY, TOUR_SCHEMA},
};

pub static BOOKING_SCHEMA: ResourceSchema = ResourceSchema {
    table: "bookings",
    columns: &[
        Column::new("id", "bookings.id", FieldKind::Uuid),
        Column::new("tour", "bookings.tour_id", FieldKind::Uuid),
        Column::new("user", "bookings.user_id", FieldKind::Uuid),
        Column::new("price", "bookings.price", FieldKind::Float),
        Column::new("paid", "bookings.paid", FieldKind::Bool),
        Column::new("createdAt", "bookings.created_at", FieldKind::Timestamp),
        Column::new("version", "bookings.version", FieldKind::Int),
    ],
    hidden: &["version"],
};

const PARTIES: &[Relation] = &[
    Relation {
        field: "user",
        sql: "(SELECT jsonb_build_object('id', u.id, 'name', u.name, 'email', u.email, \
              'photo', u.photo) FROM users u WHERE u.id = bookings.user_id)",
    },
    Relation {
        field: "tour",
        sql: "(SELECT jsonb_build_object('id', t.id, 'name', t.name) \
              FROM tours t WHERE t.id = bookings.tour_id)",
    },
];

pub struct Bookings;

pub async fn insert_booking(db: &PgPool, booking: &NewBooking) -> sqlx::Result<Uuid> {
    sqlx::query_scalar(
        "INSERT INTO bookings (tour_id, user_id, price, paid) VALUES ($1, $2, $3, $4) RETURNING id",
    )
    .bind(booking.tour_id)
    .bind(booking.user_id)
    .bind(booking.price)
    .bind(booking.paid)
    .fetch_one(db)
    .await
}

#[axum::async_trait]
impl Resource for Bookings {
    const NAME: &'static str = "booking";
    type Create = CreateBooking;
    type Update = UpdateBooking;

    fn schema() -> &'static ResourceSchema {
        &BOOKING_SCHEMA
    }

    fn relations(op: Operation) -> &'static [Relation] {
        match op {
            Operation::FindMany | Operation::FindOne | Operation::UpdateOne => PARTIES,
            Operation::DeleteOne => &[],
        }
    }

    async fn insert(db: &PgPool, input: CreateBooking) -> AppResult<Uuid> {
        let booking = input.validate()?;
        Ok(insert_booking(db, &booking).await?)
    }

    async fn update(
        db: &PgPool,
        id: Uuid,
        patch: UpdateBooking,
        scope: Scope,
    ) -> AppResult<Option<Uuid>> {
        let patch = patch.validate()?;
        let mut qb = update_statement("bookings");
        assign(&mut qb, "price", patch.price);
        assign(&mut qb, "paid", patch.paid);
        finish_update::<Bookings>(db, qb, id, scope).await
    }
}

fn booked_tours_query(user_id: Uuid) -> QueryBuilder<'static, sqlx::Postgres> {
    let spec = QuerySpec::document(&TOUR_SCHEMA);
    let mut qb = QueryBuilder::new("SELECT ");
    push_document(&mut qb, &spec.projection, GUIDES_ONLY);
    qb.push(
        " AS doc FROM tours WHERE tours.id IN \
         (SELECT b.tour_id FROM bookings b WHERE b.user_id = ",
    )
    .push_bind(user_id)
    .push(") ORDER BY tours.name ASC");
    qb
}

/// Documents of every tour the user holds a booking for, secret tours included.
pub async fn booked_tours(db: &PgPool, user_id: Uuid) -> sqlx::Result<Vec<Value>> {
    fetch_documents(db, booked_tours_query(user_id)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{sql::select_documents, ApiFeatures};

    #[test]
    fn bookings_expand_user_and_tour_name() {
        let spec = ApiFeatures::parse(&BOOKING_SCHEMA, vec![("paid".into(), "true".into())]).unwrap();
        let sql = select_documents(
            &BOOKING_SCHEMA,
            &spec,
            &Bookings::scope(Operation::FindMany),
            Bookings::relations(Operation::FindMany),
        )
        .sql()
        .to_string();
        assert!(sql.contains("'user', (SELECT jsonb_build_object('id', u.id"));
        assert!(sql.contains("'tour', (SELECT jsonb_build_object('id', t.id, 'name', t.name)"));
        assert!(sql.contains("WHERE bookings.paid = $1"));
    }

    #[test]
    fn booked_tours_are_selected_by_user() {
        let sql = booked_tours_query(Uuid::nil()).sql().to_string();
        assert!(sql.starts_with("SELECT jsonb_build_object("));
        assert!(sql.contains("FROM bookings b WHERE b.user_id = $1"));
        assert!(!sql.contains("secret_tour = FALSE"));
    }

    async fn seed(db: &PgPool) -> (Uuid, Uuid) {
        let tour: Uuid = sqlx::query_scalar(
            "INSERT INTO tours (name, slug, duration, max_group_size, difficulty, price, \
             summary, image_cover) VALUES ('The Sea Explorer', 'the-sea-explorer', 7, 15, \
             'medium', 497, 'Exploring the jaw-dropping US east coast', 'tour-2-cover.jpg') \
             RETURNING id",
        )
        .fetch_one(db)
        .await
        .unwrap();
        let user: Uuid = sqlx::query_scalar(
            "INSERT INTO users (name, email, password_hash) VALUES ('Leo', 'leo@example.io', 'x') \
             RETURNING id",
        )
        .fetch_one(db)
        .await
        .unwrap();
        (tour, user)
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL"]
    async fn booked_tours_lists_each_booked_tour(db: PgPool) {
        let (tour_id, user_id) = seed(&db).await;
        let booking = NewBooking {
            tour_id,
            user_id,
            price: 497.0,
            paid: true,
        };
        insert_booking(&db, &booking).await.unwrap();
        let tours = booked_tours(&db, user_id).await.unwrap();
        assert_eq!(tours.len(), 1);
        assert_eq!(tours[0]["name"], "The Sea Explorer");
        assert!(booked_tours(&db, Uuid::new_v4()).await.unwrap().is_empty());
    }
}
