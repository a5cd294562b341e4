pub mod dashboard;
pub mod error;
pub mod service;
pub mod validate;

pub use dashboard::DashboardSnapshot;
pub use error::EngineError;
pub use service::TaskService;
