pub mod backup;
pub mod config;
pub mod constants;
pub mod container;
pub mod env_check;
pub mod error;
pub mod groups;
pub mod health;
pub mod rollback;
pub mod service_group;

pub use error::{Result, StackError};
