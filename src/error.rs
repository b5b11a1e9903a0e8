use thiserror::Error;

use crate::gpio::InterruptId;

pub const ENODEV: i32 = 19;
pub const EINVAL: i32 = 22;
pub const EBUSY: i32 = 16;
#[cfg(feature = "hardware-gpio")]
pub const EIO: i32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    #[error("Invalid device: line {0} is not usable as output")]
    InvalidDevice(u32),
    #[error("Resource unavailable: line {0}")]
    ResourceUnavailable(u32),
    #[error("Already claimed: line {0}")]
    AlreadyClaimed(u32),
    #[error("Line not configured: {0}")]
    NotConfigured(u32),
    #[error("Unexpected interrupt source: {0}")]
    UnexpectedInterruptSource(InterruptId),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Controller already started: {0}")]
    AlreadyStarted(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Platform error {code}: {reason}")]
    Platform { code: i32, reason: String },
}

impl AppError {
    pub fn platform(code: i32, reason: impl Into<String>) -> Self {
        AppError::Platform {
            code,
            reason: reason.into(),
        }
    }

    /// Claim and registration failures; `start()` rolls back and surfaces them as-is.
    pub fn is_acquire_failure(&self) -> bool {
        matches!(
            self,
            AppError::ResourceUnavailable(_) | AppError::AlreadyClaimed(_) | AppError::Platform { .. }
        )
    }

    /// Negative errno-style reason code.
    pub fn code(&self) -> i32 {
        match self {
            AppError::InvalidDevice(_) | AppError::ResourceUnavailable(_) => -ENODEV,
            AppError::AlreadyClaimed(_) | AppError::AlreadyStarted(_) => -EBUSY,
            AppError::NotConfigured(_)
            | AppError::InvalidState(_)
            | AppError::UnexpectedInterruptSource(_)
            | AppError::Config(_) => -EINVAL,
            AppError::Platform { code, .. } => *code,
        }
    }
}
