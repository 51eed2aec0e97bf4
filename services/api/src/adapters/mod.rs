pub mod db;

pub use db::PgBackend;
