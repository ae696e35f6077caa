pub mod aggregate;
pub mod station;
