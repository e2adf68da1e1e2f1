mod backoff_tests;
mod scheduler_tests;
mod worker_tests;
