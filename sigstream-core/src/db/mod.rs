//! Storage ports and their Postgres implementations.

pub mod ports;
pub mod postgres;

pub use ports::{RecordsRepository, SignaturesRepository};
pub use postgres::PostgresDatabase;
