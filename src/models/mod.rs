pub mod envelope;
pub mod health;
pub mod job;
pub mod retry;
