pub mod ai;
pub mod auth;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod error;
pub mod identity;
pub mod jobs;
pub mod models;
pub mod notes;
pub mod people;
pub mod routes;
pub mod schema;
pub mod state;
pub mod workers;

pub use workers::{default_handlers, JobExecution, JobHandler, Worker};
