// Common library: timetable engine, schedule lifecycle, persistence and
// shared plumbing used by the API server

pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod events;
pub mod history;
pub mod lifecycle;
pub mod models;
pub mod reasoning;
pub mod telemetry;
pub mod timetable;
