pub mod api;
pub mod clients;
pub mod config;
pub mod ingest;
pub mod models;
pub mod producer;
pub mod scheduler;
pub mod utils;
pub mod worker;
