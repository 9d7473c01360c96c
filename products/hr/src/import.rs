//! Bulk salary upload: CSV validation followed by one all-or-nothing upsert batch.

use csv::{ReaderBuilder, StringRecord, Trim};
use entity::users;
use once_cell::sync::Lazy;
use platform_api::ApiError;
use regex::Regex;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{
    ConnectionTrait, DbErr, EntityTrait, Set, TransactionTrait, sea_query::OnConflict,
};
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Digits with an optional fractional part. No exponent, separators or signs other than `-`.
static SALARY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^-?(?:0|[1-9]\d*)(?:\.\d+)?$").expect("salary pattern compiles")
});

/// Largest value a `DECIMAL(10,2)` column holds.
pub const MAX_SALARY: Decimal = Decimal::from_parts(1_410_065_407, 2, 0, false, 2);

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("file field missing")]
    MissingFile,
    #[error("CSV parse failed")]
    Parse(#[from] csv::Error),
    #[error("CSV parse failed")]
    Quoting { line: u64 },
    #[error("Bad columns")]
    BadColumns { line: u64, found: usize },
    #[error("Name cannot be empty")]
    EmptyName { line: u64 },
    #[error("Invalid salary for \"{name}\"")]
    InvalidSalary { name: String },
}

impl From<ImportError> for ApiError {
    fn from(value: ImportError) -> Self {
        match value {
            ImportError::MissingFile => ApiError::MissingField(value.to_string()),
            ImportError::Parse(_) | ImportError::Quoting { .. } => {
                ApiError::ParseError(value.to_string())
            }
            ImportError::BadColumns { .. } => ApiError::SchemaError(value.to_string()),
            ImportError::EmptyName { .. } => ApiError::EmptyName,
            ImportError::InvalidSalary { name } => ApiError::InvalidSalary { name },
        }
    }
}

/// A data row that passed validation and is queued for upsert.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SalaryRow {
    pub name: String,
    pub salary: Decimal,
}

/// Outcome of validating an upload, before any database work.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportPlan {
    pub rows: Vec<SalaryRow>,
    /// Names of rows dropped because their salary was negative.
    pub skipped: Vec<String>,
}

/// A salary cell that matched the grammar.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SalaryCell {
    Amount(Decimal),
    Negative,
}

/// Validate a salary cell. `None` means the row must be rejected.
///
/// The sign is read from the text, so a negative value too small for
/// `Decimal` is still skipped rather than stored as zero.
pub fn parse_salary(raw: &str) -> Option<SalaryCell> {
    if !SALARY_PATTERN.is_match(raw) {
        return None;
    }
    if raw.starts_with('-') && raw.bytes().any(|b| matches!(b, b'1'..=b'9')) {
        return Some(SalaryCell::Negative);
    }
    // Fractional digits past Decimal's scale are rounded off; overflow is an error.
    let value = raw.parse::<Decimal>().ok()?;
    if value.is_zero() {
        return Some(SalaryCell::Amount(Decimal::ZERO));
    }
    let rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    (rounded <= MAX_SALARY).then_some(SalaryCell::Amount(rounded))
}

#[derive(Clone, Copy)]
enum QuoteState {
    FieldStart,
    Unquoted,
    Quoted { opened_at: u64 },
    /// A `"` inside a quoted field: either an escaped quote or the closing one.
    QuoteSeen { opened_at: u64 },
    Closed,
}

/// Reject unbalanced quoting, which the `csv` reader would otherwise accept
/// silently. Quotes may only open a field, must be closed, and a closed field
/// may only be followed by whitespace and a delimiter or line end.
fn check_quoting(text: &str) -> Result<(), ImportError> {
    let mut line = 1;
    let mut state = QuoteState::FieldStart;
    for ch in text.chars() {
        state = match (state, ch) {
            (QuoteState::Quoted { opened_at }, '"') => QuoteState::QuoteSeen { opened_at },
            (QuoteState::QuoteSeen { opened_at }, '"') => QuoteState::Quoted { opened_at },
            (quoted @ QuoteState::Quoted { .. }, _) => quoted,
            (QuoteState::FieldStart, '"') => QuoteState::Quoted { opened_at: line },
            (QuoteState::Unquoted, '"') | (QuoteState::Closed, '"') => {
                return Err(ImportError::Quoting { line });
            }
            (_, ',' | '\n') => QuoteState::FieldStart,
            (QuoteState::QuoteSeen { .. } | QuoteState::Closed, c) if c.is_whitespace() => {
                QuoteState::Closed
            }
            (QuoteState::QuoteSeen { .. } | QuoteState::Closed, _) => {
                return Err(ImportError::Quoting { line });
            }
            (QuoteState::FieldStart | QuoteState::Unquoted, _) => QuoteState::Unquoted,
        };
        if ch == '\n' {
            line += 1;
        }
    }
    match state {
        QuoteState::Quoted { opened_at } => Err(ImportError::Quoting { line: opened_at }),
        _ => Ok(()),
    }
}

fn is_blank(record: &StringRecord) -> bool {
    record.iter().all(str::is_empty) && record.len() <= 1
}

/// Parse and validate the whole upload. The first record is a header and is
/// dropped unread. Any invalid row rejects the entire file.
pub fn plan_import(csv_text: Option<&str>) -> Result<ImportPlan, ImportError> {
    let text = csv_text
        .filter(|text| !text.is_empty())
        .ok_or(ImportError::MissingFile)?;
    check_quoting(text)?;

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record?;
        if !is_blank(&record) {
            records.push(record);
        }
    }

    let mut plan = ImportPlan::default();
    for record in records.iter().skip(1) {
        let line = record.position().map(|pos| pos.line()).unwrap_or_default();
        if record.len() != 2 {
            return Err(ImportError::BadColumns {
                line,
                found: record.len(),
            });
        }
        let name = record[0].trim();
        if name.is_empty() {
            return Err(ImportError::EmptyName { line });
        }
        match parse_salary(record[1].trim()) {
            None => {
                return Err(ImportError::InvalidSalary {
                    name: name.to_string(),
                });
            }
            Some(SalaryCell::Negative) => plan.skipped.push(name.to_string()),
            Some(SalaryCell::Amount(salary)) => plan.rows.push(SalaryRow {
                name: name.to_string(),
                salary,
            }),
        }
    }
    Ok(plan)
}

/// Apply every row as an insert-or-update keyed by name inside one
/// transaction. Any failure rolls the whole batch back.
#[instrument(name = "hr.apply_import", skip_all, fields(rows = rows.len()))]
pub async fn apply_import<C>(db: &C, rows: &[SalaryRow]) -> Result<(), DbErr>
where
    C: ConnectionTrait + TransactionTrait,
{
    let txn = db.begin().await?;
    for row in rows {
        let model = users::ActiveModel {
            name: Set(row.name.clone()),
            salary: Set(row.salary),
        };
        let result = users::Entity::insert(model)
            .on_conflict(
                OnConflict::column(users::Column::Name)
                    .update_column(users::Column::Salary)
                    .to_owned(),
            )
            .exec_without_returning(&txn)
            .await;
        if let Err(err) = result {
            warn!(name = %row.name, error = %err, "upsert failed; rolling back batch");
            txn.rollback().await?;
            return Err(err);
        }
    }
    txn.commit().await?;
    info!("salary upload committed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{Database, DatabaseConnection, QueryOrder};

    use super::*;

    fn dec(raw: &str) -> Decimal {
        raw.parse().unwrap()
    }

    fn plan(text: &str) -> Result<ImportPlan, ImportError> {
        plan_import(Some(text))
    }

    async fn seeded_db() -> DatabaseConnection {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        platform_db::ensure_seeded(&db).await.unwrap();
        db
    }

    async fn salaries(db: &DatabaseConnection) -> Vec<(String, Decimal)> {
        users::Entity::find()
            .order_by_asc(users::Column::Name)
            .all(db)
            .await
            .unwrap()
            .into_iter()
            .map(|row| (row.name, row.salary))
            .collect()
    }

    #[test]
    fn salary_grammar() {
        for ok in ["0", "0.0", "12", "12.34", "4100.00", "-0"] {
            assert!(matches!(parse_salary(ok), Some(SalaryCell::Amount(_))), "{ok}");
        }
        for bad in ["12a", "1,000", "1e3", "1_000", "12/34", "012", ".5", "5.", "+5", "", "--1"] {
            assert_eq!(parse_salary(bad), None, "{bad}");
        }
        assert_eq!(parse_salary("-5"), Some(SalaryCell::Negative));
        assert_eq!(parse_salary("-0.01"), Some(SalaryCell::Negative));
        assert_eq!(parse_salary("-0"), Some(SalaryCell::Amount(Decimal::ZERO)));
        assert_eq!(parse_salary("-0.000"), Some(SalaryCell::Amount(Decimal::ZERO)));
    }

    #[test]
    fn long_fractions_round_instead_of_failing() {
        assert_eq!(
            parse_salary("1.00000000000000000000000000000"),
            Some(SalaryCell::Amount(dec("1.00")))
        );
        assert_eq!(
            parse_salary("0.00000000000000000000000000001"),
            Some(SalaryCell::Amount(Decimal::ZERO))
        );
        assert_eq!(
            parse_salary("-0.00000000000000000000000000001"),
            Some(SalaryCell::Negative)
        );
        assert_eq!(
            parse_salary("-99999999999999999999999999999999"),
            Some(SalaryCell::Negative)
        );
        let plan = plan("h\nAlex,1.00000000000000000000000000000\n").unwrap();
        assert_eq!(plan.rows[0].salary, dec("1"));
    }

    #[test]
    fn salaries_round_to_cents_and_respect_column_range() {
        assert_eq!(parse_salary("200.505"), Some(SalaryCell::Amount(dec("200.51"))));
        assert_eq!(parse_salary("99999999.99"), Some(SalaryCell::Amount(MAX_SALARY)));
        assert_eq!(parse_salary("100000000"), None);
        assert_eq!(parse_salary("99999999999999999999999999999999"), None);
    }

    #[test]
    fn header_is_discarded_and_fields_trimmed() {
        let plan = plan("name,salary\n  Alex , 9000.00 \n\n   \nBob,12\n").unwrap();
        assert_eq!(
            plan.rows,
            vec![
                SalaryRow {
                    name: "Alex".into(),
                    salary: dec("9000.00"),
                },
                SalaryRow {
                    name: "Bob".into(),
                    salary: dec("12"),
                },
            ]
        );
        assert!(plan.skipped.is_empty());
    }

    #[test]
    fn header_content_is_not_checked() {
        assert_eq!(plan("whatever\nAlex,1\n").unwrap().rows.len(), 1);
        assert_eq!(plan("only,a,header\n").unwrap(), ImportPlan::default());
    }

    #[test]
    fn negative_rows_are_skipped() {
        let plan = plan("h\nBob,-5\nAlex,1\n").unwrap();
        assert_eq!(plan.skipped, vec!["Bob".to_string()]);
        assert_eq!(plan.rows.len(), 1);
    }

    #[test]
    fn quoted_fields_keep_embedded_commas() {
        let plan = plan("h\n\"Smith, Jo\",10.5\n").unwrap();
        assert_eq!(plan.rows[0].name, "Smith, Jo");
    }

    #[test]
    fn quoting_follows_rfc4180() {
        assert!(check_quoting("h\n\"Smith, Jo\",10\n").is_ok());
        assert!(check_quoting("h\n\"say \"\"hi\"\"\" ,1\r\n").is_ok());
        assert!(check_quoting("h\n\"two\nlines\",1").is_ok());
        assert!(matches!(
            check_quoting("h\nAl\"ex,7"),
            Err(ImportError::Quoting { line: 2 })
        ));
        assert!(matches!(
            check_quoting("h\nAlex,\"9000\nBob,\"5"),
            Err(ImportError::Quoting { .. })
        ));
        assert!(matches!(
            check_quoting("h\nAlex,\"9000\n"),
            Err(ImportError::Quoting { line: 2 })
        ));
        assert!(matches!(
            check_quoting("h\n\"Alex\"x,1"),
            Err(ImportError::Quoting { line: 2 })
        ));
    }

    #[test]
    fn unbalanced_quotes_fail_the_upload() {
        for text in ["h\nAl\"ex,7", "h\nAlex,\"9000\nBob,\"5"] {
            let err = plan(text).unwrap_err();
            assert!(matches!(err, ImportError::Quoting { .. }), "{text:?}");
            let api: ApiError = err.into();
            assert!(matches!(api, ApiError::ParseError(ref msg) if msg == "CSV parse failed"));
        }
    }

    #[test]
    fn rejects_whole_file_on_any_bad_row() {
        assert!(matches!(
            plan("h\nAlex,1\nBob,12,34\n"),
            Err(ImportError::BadColumns { found: 3, .. })
        ));
        assert!(matches!(plan("h\nAlex\n"), Err(ImportError::BadColumns { found: 1, .. })));
        assert!(matches!(plan("h\n  ,12\n"), Err(ImportError::EmptyName { .. })));
        match plan("h\nAlex,1\nBob,1e3\n") {
            Err(ImportError::InvalidSalary { name }) => assert_eq!(name, "Bob"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_reported() {
        assert!(matches!(plan_import(None), Err(ImportError::MissingFile)));
        assert!(matches!(plan_import(Some("")), Err(ImportError::MissingFile)));
    }

    #[test]
    fn errors_map_onto_the_api_taxonomy() {
        let api: ApiError = ImportError::BadColumns { line: 2, found: 3 }.into();
        assert!(matches!(api, ApiError::SchemaError(ref msg) if msg == "Bad columns"));
        let api: ApiError = ImportError::InvalidSalary { name: "Bob".into() }.into();
        assert_eq!(api.to_string(), "Invalid salary for \"Bob\"");
    }

    #[tokio::test]
    async fn upserts_update_existing_and_insert_new() {
        let db = seeded_db().await;
        let plan = plan("name,salary\nAlex,9000.00\nZed,10\n").unwrap();
        apply_import(&db, &plan.rows).await.unwrap();

        let rows = salaries(&db).await;
        assert_eq!(rows.len(), 6);
        assert!(rows.contains(&("Alex".into(), dec("9000"))));
        assert!(rows.contains(&("Bryan".into(), dec("3500"))));
        assert!(rows.contains(&("Zed".into(), dec("10"))));
    }

    #[tokio::test]
    async fn later_duplicate_wins() {
        let db = seeded_db().await;
        let plan = plan("h\nNew,1\nNew,2\n").unwrap();
        apply_import(&db, &plan.rows).await.unwrap();
        let rows = salaries(&db).await;
        assert_eq!(rows.iter().filter(|(name, _)| name == "New").count(), 1);
        assert!(rows.contains(&("New".into(), dec("2"))));
    }

    #[tokio::test]
    async fn empty_batch_commits() {
        let db = seeded_db().await;
        apply_import(&db, &[]).await.unwrap();
        assert_eq!(salaries(&db).await.len(), 5);
    }

    #[tokio::test]
    async fn failing_row_rolls_back_the_batch() {
        let db = seeded_db().await;
        db.execute_unprepared(
            "CREATE TRIGGER reject_boom BEFORE INSERT ON users \
             WHEN NEW.name = 'Boom' BEGIN SELECT RAISE(ABORT, 'boom'); END;",
        )
        .await
        .unwrap();

        let plan = plan("h\nAlex,9000\nBoom,1\n").unwrap();
        assert!(apply_import(&db, &plan.rows).await.is_err());

        let rows = salaries(&db).await;
        assert!(rows.contains(&("Alex".into(), dec("3000"))));
        assert!(!rows.iter().any(|(name, _)| name == "Boom"));
    }
}
