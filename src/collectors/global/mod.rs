//! Server-wide scrapers: `SHOW GLOBAL STATUS`, `SHOW GLOBAL VARIABLES` and
//! `SHOW BINARY LOGS`.

mod binlog;
mod status;
mod variables;

pub use binlog::BinlogSize;
pub use status::GlobalStatus;
pub use variables::GlobalVariables;

use crate::collectors::query::QueryRow;

/// `(Variable_name, Value)` pairs of a `SHOW ... STATUS/VARIABLES` result.
pub(crate) fn key_values(rows: &[QueryRow]) -> impl Iterator<Item = (&str, &[u8])> {
    rows.iter().filter_map(|row| Some((row.str(0)?, row.bytes(1)?)))
}
