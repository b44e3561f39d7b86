/// stdout + rotating file logging on top of `fern`.
pub mod loggerlocal;

pub use loggerlocal::{setup_logging, LoggerError};
