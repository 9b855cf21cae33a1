pub mod health;
pub mod raw;
pub mod upload;
