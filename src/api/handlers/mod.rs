pub mod health;
pub mod index;
pub mod reports;
pub mod upload;
pub mod validate;
