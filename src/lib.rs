pub mod backend;
mod config;
mod controller;
mod dispatcher;
mod error;
mod gpio;
mod notify;
mod resource;

pub use config::{
    AppConfig, ControllerConfig, DEFAULT_CHIP, DEFAULT_DEBOUNCE_MS, DEFAULT_NOTIFY_QUEUE_CAPACITY,
    NotifyCommand,
};
pub use controller::LedController;
pub use dispatcher::{Button, EdgeDispatcher, LED_OFF, LED_ON, PressCounters, PressCounts};
pub use error::AppError;
pub use gpio::{
    Direction, EdgeHandler, GpioBackend, InterruptId, IrqReturn, Level, SharedHandler, Trigger,
};
pub use notify::{NotifyQueue, NotifyRequest, ProcessLauncher, TokioLauncher, spawn_worker};
pub use resource::{PinMode, ResourceManager, Slot};

#[cfg(feature = "hardware-gpio")]
pub use backend::LibgpiodBackend;
pub use backend::MockGpioBackend;
