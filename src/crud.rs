//! Generic list/get/create/update/delete over any [`Resource`].

use axum::{http::StatusCode, Json};
use serde_json::{json, Value};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    query::{
        sql::{self, Scope},
        ApiFeatures, FilterValue, Operation, QuerySpec, Relation, ResourceSchema,
    },
    state::AppState,
};

/// A table exposed through the generic handlers.
#[axum::async_trait]
pub trait Resource: Send + Sync + 'static {
    /// Singular name used in log events.
    const NAME: &'static str;
    type Create: Send + 'static;
    type Update: Send + 'static;

    fn schema() -> &'static ResourceSchema;

    fn scope(_op: Operation) -> Scope {
        Scope::new()
    }

    fn relations(_op: Operation) -> &'static [Relation] {
        &[]
    }

    /// Validates and inserts; returns the new id.
    async fn insert(db: &PgPool, input: Self::Create) -> AppResult<Uuid>;

    /// Validates and applies a partial update to the row `id` within `scope`;
    /// `None` when no such row.
    async fn update(
        db: &PgPool,
        id: Uuid,
        patch: Self::Update,
        scope: Scope,
    ) -> AppResult<Option<Uuid>>;
}

pub fn parse_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::bad_request(format!("Invalid id: {raw}.")))
}

/// Query string as ordered pairs; repeated keys stay repeated.
pub fn query_pairs(raw: Option<String>) -> AppResult<Vec<(String, String)>> {
    match raw {
        None => Ok(Vec::new()),
        Some(q) => serde_urlencoded::from_str(&q)
            .map_err(|_| AppError::bad_request("Invalid query string.")),
    }
}

pub fn document_body(doc: Value) -> Json<Value> {
    Json(json!({ "status": "success", "data": { "data": doc } }))
}

pub fn list_body(docs: Vec<Value>) -> Json<Value> {
    Json(json!({
        "status": "success",
        "results": docs.len(),
        "data": { "data": docs },
    }))
}

fn by_id<R: Resource>(id: Uuid, scope: Scope) -> Scope {
    scope.eq(R::schema().id_column().expr, FilterValue::Uuid(id))
}

/// Appends `WHERE id = $n AND <scope> RETURNING id` and runs an update built
/// by a resource.
pub async fn finish_update<R: Resource>(
    db: &PgPool,
    mut qb: QueryBuilder<'static, Postgres>,
    id: Uuid,
    scope: Scope,
) -> AppResult<Option<Uuid>> {
    by_id::<R>(id, scope).push_where(&mut qb, &[]);
    qb.push(" RETURNING ").push(R::schema().id_column().expr);
    Ok(qb.build_query_scalar::<Uuid>().fetch_optional(db).await?)
}

async fn load<R: Resource>(
    db: &PgPool,
    id: Uuid,
    scope: Scope,
    relations: &[Relation],
) -> AppResult<Option<Value>> {
    let schema = R::schema();
    let spec = QuerySpec::document(schema);
    let qb = sql::select_documents(schema, &spec, &by_id::<R>(id, scope), relations);
    Ok(sql::fetch_document(db, qb).await?)
}

pub async fn list<R: Resource>(
    state: &AppState,
    params: Vec<(String, String)>,
    parent: Scope,
) -> AppResult<Json<Value>> {
    let schema = R::schema();
    let spec = ApiFeatures::parse(schema, params)?;
    let scope = R::scope(Operation::FindMany).merge(parent);
    let qb = sql::select_documents(schema, &spec, &scope, R::relations(Operation::FindMany));
    let docs = sql::fetch_documents(&state.db, qb).await?;
    debug!(resource = R::NAME, results = docs.len(), skip = spec.skip, "list");
    Ok(list_body(docs))
}

/// One in-scope document with its relations expanded.
pub async fn find_one<R: Resource>(state: &AppState, id: Uuid) -> AppResult<Value> {
    load::<R>(
        &state.db,
        id,
        R::scope(Operation::FindOne),
        R::relations(Operation::FindOne),
    )
    .await?
    .ok_or_else(AppError::no_document)
}

pub async fn get_one<R: Resource>(state: &AppState, raw_id: &str) -> AppResult<Json<Value>> {
    let id = parse_id(raw_id)?;
    Ok(document_body(find_one::<R>(state, id).await?))
}

pub async fn create_one<R: Resource>(
    state: &AppState,
    input: R::Create,
) -> AppResult<(StatusCode, Json<Value>)> {
    let id = R::insert(&state.db, input).await?;
    let doc = load::<R>(&state.db, id, Scope::new(), &[])
        .await?
        .ok_or_else(AppError::no_document)?;
    info!(resource = R::NAME, %id, "created");
    Ok((StatusCode::CREATED, document_body(doc)))
}

pub async fn update_one<R: Resource>(
    state: &AppState,
    raw_id: &str,
    patch: R::Update,
) -> AppResult<Json<Value>> {
    let id = parse_id(raw_id)?;
    let updated = R::update(&state.db, id, patch, R::scope(Operation::UpdateOne))
        .await?
        .ok_or_else(AppError::no_document)?;
    let doc = load::<R>(
        &state.db,
        updated,
        Scope::new(),
        R::relations(Operation::UpdateOne),
    )
    .await?
    .ok_or_else(AppError::no_document)?;
    info!(resource = R::NAME, id = %updated, "updated");
    Ok(document_body(doc))
}

pub async fn delete_one<R: Resource>(state: &AppState, raw_id: &str) -> AppResult<StatusCode> {
    let id = parse_id(raw_id)?;
    let schema = R::schema();
    let mut qb = QueryBuilder::new("DELETE FROM ");
    qb.push(schema.table);
    by_id::<R>(id, R::scope(Operation::DeleteOne)).push_where(&mut qb, &[]);
    qb.push(" RETURNING ").push(schema.id_column().expr);
    qb.build_query_scalar::<Uuid>()
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(AppError::no_document)?;
    info!(resource = R::NAME, %id, "deleted");
    Ok(StatusCode::NO_CONTENT)
}
