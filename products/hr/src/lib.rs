//! HR vertical: the salary directory read path and the CSV upload path.

pub mod directory;
pub mod import;

use entity::users;
use rust_decimal::Decimal;
use serde::Serialize;

pub use directory::{EmployeeFilter, FilterError, ListParams, Page, SortKey, list_employees};
pub use import::{ImportError, ImportPlan, SalaryRow, apply_import, plan_import};

/// Public shape of an employee row. Salaries serialize as JSON numbers.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Employee {
    pub name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub salary: Decimal,
}

impl From<users::Model> for Employee {
    fn from(model: users::Model) -> Self {
        Self {
            name: model.name,
            salary: model.salary,
        }
    }
}
