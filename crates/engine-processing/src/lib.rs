pub mod error;
pub mod executor;
pub mod planner;
pub mod pump;
pub mod retry;
pub mod source;
