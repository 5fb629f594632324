// Library exports for parklot
// This allows integration tests and external code to use parklot modules

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod parking;
pub mod routes;
pub mod state;
