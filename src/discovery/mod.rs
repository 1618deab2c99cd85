pub mod coordinator;
pub mod types;
