#[derive(Debug, PartialEq, Eq)]
pub enum InsertError {
    Taken,
    Internal,
}

mod backend_sql;
pub use backend_sql::*;
