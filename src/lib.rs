//! # omopsql — a safety layer for SQL over OMOP CDM data
//!
//! Clinical data in the OMOP Common Data Model is queried by tools that
//! generate SQL from natural language. That SQL cannot be trusted as-is:
//! it may write, it may touch tables outside the CDM, and it may read
//! `*_source_value` columns that leak un-standardized source data. This
//! crate sits between the generator and the warehouse:
//!
//! 1. **Validation** — parse the query and check it against policy,
//!    reporting every violation at once rather than failing on the first.
//! 2. **Transpilation** — rewrite PostgreSQL date and range idioms into
//!    Databricks Spark SQL so generators can keep emitting Postgres.
//! 3. **Execution** — run the result through a pluggable backend with a
//!    row cap and CSV output.
//!
//! ## Quick Example
//!
//! ```rust
//! use omopsql::prelude::*;
//!
//! let validator = Validator::new(Policy::default());
//! let violations = validator.validate("SELECT gender_source_value FROM person");
//! assert_eq!(violations.len(), 1);
//!
//! let sql = transpile(
//!     "SELECT 1 FROM visit_occurrence WHERE (visit_end_date - visit_start_date) > 7",
//!     Dialect::Postgres,
//!     Dialect::Databricks,
//! ).unwrap();
//! assert!(sql.contains("DATEDIFF"));
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod policy;
pub mod transpiler;
pub mod validator;

pub mod prelude {
    pub use crate::config::Config;
    pub use crate::engine::{QueryBackend, QueryEngine, Rows};
    pub use crate::error::{QueryError, QueryResult};
    pub use crate::policy::{Policy, OMOP_TABLES};
    pub use crate::transpiler::{transpile, Dialect, TranspileError};
    pub use crate::validator::{Validator, Violation};
}

pub use config::Config;
pub use engine::{QueryBackend, QueryEngine, Rows};
pub use error::{QueryError, QueryResult};
pub use policy::Policy;
pub use transpiler::{transpile, Dialect};
pub use validator::{Validator, Violation};
