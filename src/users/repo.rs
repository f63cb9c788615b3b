use std::convert::Infallible;

use sqlx::PgPool;
use uuid::Uuid;

use super::dto::UpdateUser;
use crate::{
    crud::{finish_update, Resource},
    error::AppResult,
    query::{
        sql::{assign, update_statement, Scope},
        Column, FieldKind, Operation, ResourceSchema,
    },
};

pub static USER_SCHEMA: ResourceSchema = ResourceSchema {
    table: "users",
    columns: &[
        Column::new("id", "users.id", FieldKind::Uuid),
        Column::new("name", "users.name", FieldKind::Text),
        Column::new("email", "users.email", FieldKind::Text),
        Column::new("photo", "users.photo", FieldKind::Text),
        Column::new("role", "users.role::text", FieldKind::Text),
        Column::new("createdAt", "users.created_at", FieldKind::Timestamp),
        Column::new("version", "users.version", FieldKind::Int),
    ],
    hidden: &["version"],
};

pub const ACTIVE_ONLY: &str = "users.active = TRUE";

pub struct Users;

#[axum::async_trait]
impl Resource for Users {
    const NAME: &'static str = "user";
    /// Accounts are only created through signup.
    type Create = Infallible;
    type Update = UpdateUser;

    fn schema() -> &'static ResourceSchema {
        &USER_SCHEMA
    }

    fn scope(_op: Operation) -> Scope {
        Scope::new().with(ACTIVE_ONLY)
    }

    async fn insert(_db: &PgPool, input: Infallible) -> AppResult<Uuid> {
        match input {}
    }

    async fn update(
        db: &PgPool,
        id: Uuid,
        patch: UpdateUser,
        scope: Scope,
    ) -> AppResult<Option<Uuid>> {
        let patch = patch.validate()?;
        let mut qb = update_statement("users");
        assign(&mut qb, "name", patch.name);
        assign(&mut qb, "email", patch.email);
        assign(&mut qb, "role", patch.role);
        assign(&mut qb, "photo", patch.photo);
        finish_update::<Users>(db, qb, id, scope).await
    }
}
