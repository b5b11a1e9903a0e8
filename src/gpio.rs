use std::fmt;
use std::sync::Arc;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InterruptId(pub u32);

impl fmt::Display for InterruptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "irq {}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Level {
    #[default]
    Low,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Output { initial: Level },
    Input,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Rising,
    Falling,
    Both,
}

impl Trigger {
    pub fn matches(self, observed: Trigger) -> bool {
        match self {
            Trigger::Rising => observed == Trigger::Rising,
            Trigger::Falling => observed == Trigger::Falling,
            Trigger::Both => matches!(observed, Trigger::Rising | Trigger::Falling),
        }
    }
}

/// Outcome reported back to the platform for a delivered interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    None,
    Handled,
}

/// Callback invoked by a backend when a registered interrupt fires.
///
/// Runs in the backend's delivery context (a listener thread for libgpiod, the
/// caller's thread for the simulated backend) and must return quickly without
/// blocking.
pub trait EdgeHandler: Send + Sync {
    fn on_edge(&self, source: InterruptId) -> IrqReturn;
}

pub type SharedHandler = Arc<dyn EdgeHandler>;

/// Pin multiplexing and interrupt service of the host platform.
pub trait GpioBackend: Send + Sync {
    fn is_valid(&self, line: u32) -> bool;
    fn claim(&self, line: u32, tag: &str) -> Result<(), AppError>;
    fn set_direction(&self, line: u32, direction: Direction) -> Result<(), AppError>;
    fn set_level(&self, line: u32, level: Level) -> Result<(), AppError>;
    fn get_level(&self, line: u32) -> Result<Level, AppError>;
    fn set_debounce(&self, line: u32, debounce_ms: u64) -> Result<(), AppError>;
    /// Export or unexport the line for external observation.
    fn set_visible(&self, line: u32, visible: bool) -> Result<(), AppError>;
    fn to_interrupt(&self, line: u32) -> Result<InterruptId, AppError>;
    fn register_interrupt(
        &self,
        irq: InterruptId,
        trigger: Trigger,
        tag: &str,
        handler: SharedHandler,
    ) -> Result<(), AppError>;
    fn unregister_interrupt(&self, irq: InterruptId);
    fn release(&self, line: u32);
}
