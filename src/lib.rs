pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod storage;

pub use error::{AppError, Result};
