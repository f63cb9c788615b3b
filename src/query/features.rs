use lazy_static::lazy_static;
use regex::Regex;

use super::schema::{cast, Column, FilterValue, ResourceSchema};
use crate::error::{AppError, AppResult};

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_LIMIT: i64 = 100;
pub const DEFAULT_SORT: &str = "-createdAt";

const RESERVED: [&str; 4] = ["page", "sort", "limit", "fields"];

lazy_static! {
    static ref BRACKET_KEY: Regex = Regex::new(r"^(?P<field>[^\[\]]+)\[(?P<op>[^\[\]]*)\]$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparison {
    /// Unknown operators fall back to equality.
    fn parse(op: &str) -> Self {
        match op {
            "gt" => Comparison::Gt,
            "gte" => Comparison::Gte,
            "lt" => Comparison::Lt,
            "lte" => Comparison::Lte,
            _ => Comparison::Eq,
        }
    }

    pub fn sql(self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Gt => ">",
            Comparison::Gte => ">=",
            Comparison::Lt => "<",
            Comparison::Lte => "<=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        column: Column,
        op: Comparison,
        value: FilterValue,
    },
    In {
        column: Column,
        values: Vec<FilterValue>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub column: Column,
    pub descending: bool,
}

/// A fully parsed listing request, ready to render. Nothing here has touched
/// the database yet.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    pub predicates: Vec<Predicate>,
    pub sort: Vec<SortKey>,
    pub projection: Vec<Column>,
    pub skip: i64,
    pub limit: i64,
}

impl QuerySpec {
    /// Single-document read: default projection, no filter or order.
    pub fn document(schema: &ResourceSchema) -> Self {
        Self {
            predicates: Vec::new(),
            sort: Vec::new(),
            projection: schema.default_projection(),
            skip: 0,
            limit: 1,
        }
    }
}

/// Builder over the raw query pairs of a listing request. Stages run in the
/// order filter, sort, limit_fields, paginate.
pub struct ApiFeatures<'a> {
    schema: &'a ResourceSchema,
    params: Vec<(String, String)>,
    spec: QuerySpec,
}

impl<'a> ApiFeatures<'a> {
    pub fn new(schema: &'a ResourceSchema, params: Vec<(String, String)>) -> Self {
        Self {
            schema,
            params,
            spec: QuerySpec {
                predicates: Vec::new(),
                sort: Vec::new(),
                projection: schema.default_projection(),
                skip: 0,
                limit: DEFAULT_LIMIT,
            },
        }
    }

    /// Runs every stage.
    pub fn parse(schema: &'a ResourceSchema, params: Vec<(String, String)>) -> AppResult<QuerySpec> {
        Ok(Self::new(schema, params)
            .filter()?
            .sort()?
            .limit_fields()?
            .paginate()
            .build())
    }

    /// All values of a reserved key joined with commas.
    fn joined(&self, key: &str) -> Option<String> {
        let values: Vec<&str> = self
            .params
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect();
        (!values.is_empty()).then(|| values.join(","))
    }

    fn last(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn filter(mut self) -> AppResult<Self> {
        // (column, operator, raw values) in first-seen order
        let mut groups: Vec<(Column, Comparison, Vec<&str>)> = Vec::new();
        for (key, raw) in &self.params {
            if RESERVED.contains(&key.as_str()) {
                continue;
            }
            let (field, op) = match BRACKET_KEY.captures(key) {
                Some(caps) => (
                    caps.name("field").map_or("", |m| m.as_str()),
                    Comparison::parse(caps.name("op").map_or("", |m| m.as_str())),
                ),
                None => (key.as_str(), Comparison::Eq),
            };
            let column = *self.schema.require(field)?;
            if !column.filterable() {
                return Err(AppError::bad_request(format!("Invalid field: {field}")));
            }
            match groups
                .iter_mut()
                .find(|(c, o, _)| c.field == column.field && *o == op)
            {
                Some((_, _, values)) => values.push(raw),
                None => groups.push((column, op, vec![raw])),
            }
        }

        let mut predicates = Vec::with_capacity(groups.len());
        for (column, op, raws) in groups {
            let mut values = raws
                .into_iter()
                .map(|raw| cast(column.field, column.kind, raw))
                .collect::<AppResult<Vec<_>>>()?;
            if op == Comparison::Eq && values.len() > 1 {
                predicates.push(Predicate::In { column, values });
            } else if op == Comparison::Eq {
                if let Some(value) = values.pop() {
                    predicates.push(Predicate::Compare { column, op, value });
                }
            } else {
                predicates.extend(
                    values
                        .into_iter()
                        .map(|value| Predicate::Compare { column, op, value }),
                );
            }
        }
        self.spec.predicates = predicates;
        Ok(self)
    }

    pub fn sort(mut self) -> AppResult<Self> {
        let raw = self.joined("sort").unwrap_or_default();
        let mut keys = parse_sort(self.schema, &raw)?;
        if keys.is_empty() && self.schema.column("createdAt").is_some() {
            keys = parse_sort(self.schema, DEFAULT_SORT)?;
        }
        self.spec.sort = keys;
        Ok(self)
    }

    pub fn limit_fields(mut self) -> AppResult<Self> {
        let Some(raw) = self.joined("fields") else {
            return Ok(self);
        };
        let names: Vec<&str> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if names.is_empty() {
            return Ok(self);
        }

        let excluded = names.iter().filter(|n| n.starts_with('-')).count();
        let projection = if excluded == names.len() {
            let mut drop = Vec::with_capacity(names.len());
            for name in &names {
                drop.push(self.schema.require(&name[1..])?.field);
            }
            self.schema
                .default_projection()
                .into_iter()
                .filter(|c| c.field == "id" || !drop.contains(&c.field))
                .collect()
        } else if excluded == 0 {
            let mut cols = vec![*self.schema.id_column()];
            for name in &names {
                let col = *self.schema.require(name)?;
                if !cols.iter().any(|c| c.field == col.field) {
                    cols.push(col);
                }
            }
            cols
        } else {
            return Err(AppError::bad_request(
                "Projection cannot mix inclusion and exclusion.",
            ));
        };
        self.spec.projection = projection;
        Ok(self)
    }

    pub fn paginate(mut self) -> Self {
        let page = positive(self.last("page")).unwrap_or(DEFAULT_PAGE);
        let limit = positive(self.last("limit")).unwrap_or(DEFAULT_LIMIT);
        self.spec.limit = limit;
        self.spec.skip = limit.saturating_mul(page - 1);
        self
    }

    pub fn build(self) -> QuerySpec {
        self.spec
    }
}

fn positive(raw: Option<&str>) -> Option<i64> {
    raw.and_then(|r| r.trim().parse::<i64>().ok())
        .filter(|n| *n > 0)
}

fn parse_sort(schema: &ResourceSchema, raw: &str) -> AppResult<Vec<SortKey>> {
    let mut keys: Vec<SortKey> = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (name, descending) = match part.strip_prefix('-') {
            Some(rest) => (rest, true),
            None => (part.strip_prefix('+').unwrap_or(part), false),
        };
        let column = *schema.require(name)?;
        if !column.sortable() {
            return Err(AppError::bad_request(format!("Invalid field: {name}")));
        }
        if !keys.iter().any(|k| k.column.field == column.field) {
            keys.push(SortKey { column, descending });
        }
    }
    Ok(keys)
}
