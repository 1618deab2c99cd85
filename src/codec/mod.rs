pub mod gatt;
pub mod gesture;
pub mod matrix;
