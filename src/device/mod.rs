pub mod connection;
pub mod constants;
pub mod timer;
pub mod types;
pub mod write_flow;
