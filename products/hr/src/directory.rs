//! Filtered, sorted reads over the `users` table.

use entity::users;
use platform_api::ApiError;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseBackend, DbErr, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Select,
};
use serde::Deserialize;
use thiserror::Error;
use tracing::instrument;

use crate::Employee;

pub const DEFAULT_MIN_SALARY: f64 = 0.0;
pub const DEFAULT_MAX_SALARY: f64 = 4000.0;

/// Largest row count every supported engine accepts as a bound parameter.
/// Larger `limit`/`offset` values are clamped to it.
pub const MAX_ROW_COUNT: u64 = i64::MAX as u64;

/// Query string as received. Values stay textual so that bad input becomes
/// a JSON `InvalidParameter` error instead of an extractor rejection.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ListParams {
    pub min: Option<String>,
    pub max: Option<String>,
    pub offset: Option<String>,
    pub limit: Option<String>,
    pub sort: Option<String>,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FilterError {
    #[error("Invalid sort param")]
    Sort,
    #[error("Invalid {0} param")]
    Number(&'static str),
}

impl From<FilterError> for ApiError {
    fn from(value: FilterError) -> Self {
        ApiError::InvalidParameter(value.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortKey {
    Name,
    Salary,
}

impl SortKey {
    fn parse(raw: &str) -> Result<Self, FilterError> {
        match raw.to_uppercase().as_str() {
            "NAME" => Ok(SortKey::Name),
            "SALARY" => Ok(SortKey::Salary),
            _ => Err(FilterError::Sort),
        }
    }

    fn column(self) -> users::Column {
        match self {
            SortKey::Name => users::Column::Name,
            SortKey::Salary => users::Column::Salary,
        }
    }
}

/// Pagination clause shape. Only these three forms are ever emitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Page {
    All,
    Window { limit: u64, offset: u64 },
    Skip { offset: u64 },
}

/// Validated read request.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EmployeeFilter {
    pub min: f64,
    pub max: f64,
    pub sort: Option<SortKey>,
    pub page: Page,
}

impl Default for EmployeeFilter {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN_SALARY,
            max: DEFAULT_MAX_SALARY,
            sort: None,
            page: Page::All,
        }
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_bound(value: &Option<String>, name: &'static str, default: f64) -> Result<f64, FilterError> {
    match present(value) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or(FilterError::Number(name)),
    }
}

fn parse_count(value: &Option<String>, name: &'static str) -> Result<Option<u64>, FilterError> {
    present(value)
        .map(|raw| {
            raw.parse::<u64>()
                .map(|count| count.min(MAX_ROW_COUNT))
                .map_err(|_| FilterError::Number(name))
        })
        .transpose()
}

impl TryFrom<&ListParams> for EmployeeFilter {
    type Error = FilterError;

    fn try_from(params: &ListParams) -> Result<Self, Self::Error> {
        let sort = present(&params.sort).map(SortKey::parse).transpose()?;
        let min = parse_bound(&params.min, "min", DEFAULT_MIN_SALARY)?;
        let max = parse_bound(&params.max, "max", DEFAULT_MAX_SALARY)?;
        let offset = parse_count(&params.offset, "offset")?.unwrap_or(0);
        let page = match parse_count(&params.limit, "limit")? {
            Some(limit) => Page::Window { limit, offset },
            None if offset > 0 => Page::Skip { offset },
            None => Page::All,
        };
        Ok(Self {
            min,
            max,
            sort,
            page,
        })
    }
}

/// Row count standing in for "no limit" on engines that cannot express an
/// offset on its own. `None` means the engine has a native offset-only form.
fn unbounded_limit(backend: DatabaseBackend) -> Option<u64> {
    match backend {
        DatabaseBackend::MySql => Some(u64::MAX),
        DatabaseBackend::Sqlite => Some(MAX_ROW_COUNT),
        DatabaseBackend::Postgres => None,
    }
}

/// Build the read query. Every user-supplied value is a bound parameter.
pub fn build_select(filter: &EmployeeFilter, backend: DatabaseBackend) -> Select<users::Entity> {
    let mut select = users::Entity::find()
        .filter(users::Column::Salary.between(filter.min, filter.max));

    if let Some(sort) = filter.sort {
        select = select.order_by_asc(sort.column());
    }

    match filter.page {
        Page::All => select,
        Page::Window { limit, offset } => select.limit(limit).offset(offset),
        Page::Skip { offset } => match unbounded_limit(backend) {
            Some(limit) => select.limit(limit).offset(offset),
            None => select.offset(offset),
        },
    }
}

#[instrument(name = "hr.list_employees", skip_all, fields(min = filter.min, max = filter.max))]
pub async fn list_employees<C>(db: &C, filter: &EmployeeFilter) -> Result<Vec<Employee>, DbErr>
where
    C: ConnectionTrait,
{
    let rows = build_select(filter, db.get_database_backend())
        .all(db)
        .await?;
    Ok(rows.into_iter().map(Employee::from).collect())
}
