use serde_json::Value;
use sqlx::{Encode, PgPool, Postgres, QueryBuilder, Type};

use super::{
    features::{Comparison, Predicate, QuerySpec},
    schema::{Column, FilterValue, Relation, ResourceSchema},
};

/// Conditions every row must satisfy regardless of the client's filter:
/// default scopes (`secret_tour = FALSE`) and parent scopes (one tour's reviews).
#[derive(Debug, Clone, Default)]
pub struct Scope {
    conditions: Vec<&'static str>,
    bound: Vec<(&'static str, FilterValue)>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a fixed SQL condition.
    pub fn with(mut self, condition: &'static str) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Adds `expr = <bound value>`.
    pub fn eq(mut self, expr: &'static str, value: FilterValue) -> Self {
        self.bound.push((expr, value));
        self
    }

    pub fn merge(mut self, other: Scope) -> Self {
        self.conditions.extend(other.conditions);
        self.bound.extend(other.bound);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.bound.is_empty()
    }

    /// Renders ` WHERE ...` (or nothing) including `extra` predicates.
    pub fn push_where(&self, qb: &mut QueryBuilder<'static, Postgres>, extra: &[Predicate]) {
        if self.is_empty() && extra.is_empty() {
            return;
        }
        qb.push(" WHERE ");
        let mut first = true;
        for cond in &self.conditions {
            separate(qb, &mut first, " AND ");
            qb.push(*cond);
        }
        for (expr, value) in &self.bound {
            separate(qb, &mut first, " AND ");
            qb.push(*expr).push(" = ");
            push_value(qb, value.clone());
        }
        for pred in extra {
            separate(qb, &mut first, " AND ");
            push_predicate(qb, pred);
        }
    }
}

fn separate(qb: &mut QueryBuilder<'static, Postgres>, first: &mut bool, sep: &str) {
    if !*first {
        qb.push(sep);
    }
    *first = false;
}

pub fn push_value(qb: &mut QueryBuilder<'static, Postgres>, value: FilterValue) {
    match value {
        FilterValue::Text(v) => qb.push_bind(v),
        FilterValue::Int(v) => qb.push_bind(v),
        FilterValue::Float(v) => qb.push_bind(v),
        FilterValue::Bool(v) => qb.push_bind(v),
        FilterValue::Timestamp(v) => qb.push_bind(v),
        FilterValue::Uuid(v) => qb.push_bind(v),
    };
}

fn push_predicate(qb: &mut QueryBuilder<'static, Postgres>, pred: &Predicate) {
    match pred {
        Predicate::Compare { column, op, value } if column.kind.is_array() => {
            if *op == Comparison::Eq {
                push_value(qb, value.clone());
                qb.push(" = ANY(").push(column.expr).push(")");
            } else {
                qb.push("EXISTS (SELECT 1 FROM unnest(")
                    .push(column.expr)
                    .push(") AS elem WHERE elem ")
                    .push(op.sql())
                    .push(" ");
                push_value(qb, value.clone());
                qb.push(")");
            }
        }
        Predicate::Compare { column, op, value } => {
            qb.push(column.expr).push(" ").push(op.sql()).push(" ");
            push_value(qb, value.clone());
        }
        Predicate::In { column, values } => {
            qb.push(column.expr);
            qb.push(if column.kind.is_array() { " && ARRAY[" } else { " IN (" });
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    qb.push(", ");
                }
                push_value(qb, value.clone());
            }
            qb.push(if column.kind.is_array() { "]" } else { ")" });
        }
    }
}

pub fn push_document(qb: &mut QueryBuilder<'static, Postgres>, projection: &[Column], relations: &[Relation]) {
    qb.push("jsonb_build_object(");
    let mut first = true;
    for column in projection {
        let expr = relations
            .iter()
            .find(|r| r.field == column.field)
            .map_or(column.expr, |r| r.sql);
        separate(qb, &mut first, ", ");
        qb.push("'").push(column.field).push("', ").push(expr);
    }
    for relation in relations {
        if !projection.iter().any(|c| c.field == relation.field) {
            separate(qb, &mut first, ", ");
            qb.push("'").push(relation.field).push("', ").push(relation.sql);
        }
    }
    qb.push(")");
}

/// Relations that stand for a schema column only apply when it is projected;
/// the rest are always added.
fn effective_relations(
    schema: &ResourceSchema,
    projection: &[Column],
    relations: &[Relation],
) -> Vec<Relation> {
    relations
        .iter()
        .filter(|r| {
            schema.column(r.field).is_none() || projection.iter().any(|c| c.field == r.field)
        })
        .copied()
        .collect()
}

/// `SELECT <json document> AS doc FROM <table> WHERE ... ORDER BY ... LIMIT ... OFFSET ...`
pub fn select_documents(
    schema: &ResourceSchema,
    spec: &QuerySpec,
    scope: &Scope,
    relations: &[Relation],
) -> QueryBuilder<'static, Postgres> {
    let relations = effective_relations(schema, &spec.projection, relations);
    let mut qb = QueryBuilder::new("SELECT ");
    push_document(&mut qb, &spec.projection, &relations);
    qb.push(" AS doc FROM ").push(schema.table);
    scope.push_where(&mut qb, &spec.predicates);

    if !spec.sort.is_empty() {
        qb.push(" ORDER BY ");
        for key in &spec.sort {
            qb.push(key.column.expr)
                .push(if key.descending { " DESC, " } else { " ASC, " });
        }
        // stable pages when sort keys tie
        qb.push(schema.id_column().expr).push(" ASC");
    }

    qb.push(" LIMIT ").push_bind(spec.limit);
    qb.push(" OFFSET ").push_bind(spec.skip);
    qb
}

/// `UPDATE <table> SET version = version + 1`; callers add assignments and the
/// `WHERE` clause.
pub fn update_statement(table: &str) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("UPDATE ");
    qb.push(table).push(" SET version = version + 1");
    qb
}

/// Appends `, column = $n` when a value is present.
pub fn assign<T>(qb: &mut QueryBuilder<'static, Postgres>, column: &str, value: Option<T>)
where
    T: 'static + Encode<'static, Postgres> + Send + Type<Postgres>,
{
    if let Some(v) = value {
        qb.push(", ").push(column).push(" = ").push_bind(v);
    }
}

pub async fn fetch_documents(
    db: &PgPool,
    mut qb: QueryBuilder<'static, Postgres>,
) -> sqlx::Result<Vec<Value>> {
    qb.build_query_scalar::<Value>().fetch_all(db).await
}

pub async fn fetch_document(
    db: &PgPool,
    mut qb: QueryBuilder<'static, Postgres>,
) -> sqlx::Result<Option<Value>> {
    qb.build_query_scalar::<Value>().fetch_optional(db).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{features::tests::TEST_SCHEMA, ApiFeatures};
    use uuid::Uuid;

    fn render(raw: &str, scope: &Scope, relations: &[Relation]) -> String {
        let params = serde_urlencoded::from_str(raw).unwrap();
        let spec = ApiFeatures::parse(&TEST_SCHEMA, params).unwrap();
        select_documents(&TEST_SCHEMA, &spec, scope, relations)
            .sql()
            .to_string()
    }

    #[test]
    fn renders_filters_sort_and_paging() {
        let sql = render(
            "price[gte]=100&price[lte]=500&sort=-ratingsAverage,price&page=2&limit=10",
            &Scope::new().with("tours.secret_tour = FALSE"),
            &[],
        );
        assert!(sql.starts_with("SELECT jsonb_build_object('id', tours.id, 'name', tours.name"));
        assert!(sql.contains(
            " FROM tours WHERE tours.secret_tour = FALSE AND tours.price >= $1 AND tours.price <= $2"
        ));
        assert!(sql.contains(
            " ORDER BY tours.ratings_average DESC, tours.price ASC, tours.id ASC"
        ));
        assert!(sql.ends_with(" LIMIT $3 OFFSET $4"));
        assert!(!sql.contains("'version'"));
    }

    #[test]
    fn renders_membership_and_array_filters() {
        let sql = render("difficulty=easy&difficulty=medium&startDates[gte]=2021-01-01", &Scope::new(), &[]);
        assert!(sql.contains("tours.difficulty IN ($1, $2)"));
        assert!(sql.contains(
            "EXISTS (SELECT 1 FROM unnest(tours.start_dates) AS elem WHERE elem >= $3)"
        ));
    }

    #[test]
    fn no_where_clause_without_conditions() {
        let sql = render("", &Scope::new(), &[]);
        assert!(!sql.contains("WHERE"));
        assert!(sql.contains("ORDER BY tours.created_at DESC, tours.id ASC"));
    }

    #[test]
    fn projection_and_parent_scope() {
        let scope = Scope::new().eq("tours.id", FilterValue::Uuid(Uuid::nil()));
        let sql = render("fields=name", &scope, &[]);
        assert!(sql.starts_with("SELECT jsonb_build_object('id', tours.id, 'name', tours.name) AS doc"));
        assert!(sql.contains("WHERE tours.id = $1"));
    }

    #[test]
    fn relations_replace_or_extend_the_document() {
        const RELATIONS: &[Relation] = &[
            Relation { field: "name", sql: "(SELECT 'expanded')" },
            Relation { field: "reviews", sql: "(SELECT '[]'::jsonb)" },
        ];
        let sql = render("fields=price", &Scope::new(), RELATIONS);
        assert!(!sql.contains("'expanded'"));
        assert!(sql.contains("'reviews', (SELECT '[]'::jsonb)"));

        let sql = render("fields=name", &Scope::new(), RELATIONS);
        assert!(sql.contains("'name', (SELECT 'expanded')"));
    }

    #[test]
    fn update_statement_bumps_version() {
        let mut qb = update_statement("tours");
        assign(&mut qb, "name", Some("The Sea Explorer".to_string()));
        assign::<f64>(&mut qb, "price", None);
        assert_eq!(qb.sql(), "UPDATE tours SET version = version + 1, name = $1");
    }
}
