pub mod agreement;
pub mod collaborators;
pub mod contract;
pub mod error;
pub mod event_log;
pub mod service;
pub mod settings;
pub mod status;
pub mod store;
pub mod types;
pub mod utils;
pub mod webhook;

pub use error::{FeeAgreementError, OperationResult, ValidationError};
pub use service::FeeAgreementService;
