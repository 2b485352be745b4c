// Library exports for plaza
// This allows integration tests and the binary to share modules

pub mod app;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod filters;
pub mod forms;
pub mod media;
pub mod permissions;
pub mod relations;
pub mod repository;
pub mod routes;
pub mod schedule;
pub mod state;
pub mod views;
