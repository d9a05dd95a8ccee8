pub mod api;
pub mod artifacts;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod models;
pub mod monitor;
pub mod queue;
pub mod results;
pub mod storage;

pub use error::{MrvaError, MrvaResult};
pub use manager::VariantAnalysisManager;
pub use models::*;
