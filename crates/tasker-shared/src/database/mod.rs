//! Database access: embedded migrations and the typed SQL function layer.

pub mod migrator;
pub mod sql_functions;

pub use sql_functions::SqlFunctionExecutor;
