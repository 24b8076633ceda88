//! Crate-level error type.
//!
//! Each subsystem defines its own error enum next to its code; this
//! aggregate exists for callers that drive several subsystems through
//! one `?` chain.

use thiserror::Error;

use crate::event_data::EventDataError;
use crate::hub::event_hub::HubError;
use crate::module::ExtensionError;
use crate::value::ValueError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("hub error: {0}")]
    Hub(#[from] HubError),
    #[error("extension error: {0}")]
    Extension(#[from] ExtensionError),
    #[error("event data error: {0}")]
    EventData(#[from] EventDataError),
    #[error("value error: {0}")]
    Value(#[from] ValueError),
}

pub type Result<T> = std::result::Result<T, Error>;
