pub mod admin;
pub mod stress;
