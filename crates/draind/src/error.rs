//! Error types for the supervisor daemon.

use thiserror::Error;

use crate::interlock::InterlockError;

#[derive(Error, Debug)]
pub enum DrainError {
    #[error("No battery interface found; cannot gate stress on battery level")]
    NoBattery,

    #[error(transparent)]
    Interlock(#[from] InterlockError),
}
