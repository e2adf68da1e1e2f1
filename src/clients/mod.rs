pub mod content;
pub mod email;
pub mod health;
pub mod memory;
pub mod queue;
pub mod redis_queue;
