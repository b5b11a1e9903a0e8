use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{error, info, warn};

use crate::config::NotifyCommand;
use crate::error::AppError;
use crate::gpio::{EdgeHandler, GpioBackend, InterruptId, IrqReturn, Level};
use crate::notify::{NotifyQueue, NotifyRequest};

pub const LED_ON: Level = Level::High;
pub const LED_OFF: Level = Level::Low;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    On,
    Off,
}

impl Button {
    fn level(self) -> Level {
        match self {
            Button::On => LED_ON,
            Button::Off => LED_OFF,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Button::On => "ON",
            Button::Off => "OFF",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PressCounts {
    pub on: u64,
    pub off: u64,
}

/// Per-button press counters, monotonic for the lifetime of a controller.
#[derive(Debug, Default)]
pub struct PressCounters {
    on: AtomicU64,
    off: AtomicU64,
}

impl PressCounters {
    fn bump(&self, button: Button) {
        let counter = match button {
            Button::On => &self.on,
            Button::Off => &self.off,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PressCounts {
        PressCounts {
            on: self.on.load(Ordering::Relaxed),
            off: self.off.load(Ordering::Relaxed),
        }
    }
}

/// The interrupt handler shared by the "on" and "off" buttons of one controller.
pub struct EdgeDispatcher<B: GpioBackend> {
    name: Arc<str>,
    backend: Arc<B>,
    output_pin: u32,
    on_irq: InterruptId,
    off_irq: InterruptId,
    counters: Arc<PressCounters>,
    notifier: Option<NotifyQueue>,
    on_notify: Option<Arc<NotifyCommand>>,
    off_notify: Option<Arc<NotifyCommand>>,
}

impl<B: GpioBackend> EdgeDispatcher<B> {
    pub fn new(
        name: Arc<str>,
        backend: Arc<B>,
        output_pin: u32,
        on_irq: InterruptId,
        off_irq: InterruptId,
        counters: Arc<PressCounters>,
    ) -> Self {
        Self {
            name,
            backend,
            output_pin,
            on_irq,
            off_irq,
            counters,
            notifier: None,
            on_notify: None,
            off_notify: None,
        }
    }

    pub fn with_notifications(
        mut self,
        notifier: NotifyQueue,
        on_notify: Option<NotifyCommand>,
        off_notify: Option<NotifyCommand>,
    ) -> Self {
        self.notifier = Some(notifier);
        self.on_notify = on_notify.map(Arc::new);
        self.off_notify = off_notify.map(Arc::new);
        self
    }

    pub fn counts(&self) -> PressCounts {
        self.counters.snapshot()
    }

    fn route(&self, source: InterruptId) -> Option<Button> {
        if source == self.on_irq {
            Some(Button::On)
        } else if source == self.off_irq {
            Some(Button::Off)
        } else {
            None
        }
    }

    fn apply(&self, button: Button) {
        if let Err(e) = self.backend.set_level(self.output_pin, button.level()) {
            warn!(
                "{}: failed to drive LED line {} {}: {e}",
                self.name,
                self.output_pin,
                button.label()
            );
        }
        self.counters.bump(button);
        info!(
            "{}: interrupt on LED line {} ({})",
            self.name,
            self.output_pin,
            button.label()
        );

        let command = match button {
            Button::On => &self.on_notify,
            Button::Off => &self.off_notify,
        };
        if let (Some(notifier), Some(command)) = (&self.notifier, command) {
            notifier.submit(NotifyRequest {
                source: self.name.clone(),
                command: command.clone(),
            });
        }
    }
}

impl<B: GpioBackend> EdgeHandler for EdgeDispatcher<B> {
    fn on_edge(&self, source: InterruptId) -> IrqReturn {
        match self.route(source) {
            Some(button) => self.apply(button),
            None => error!(
                "{}: {} (not defined)",
                self.name,
                AppError::UnexpectedInterruptSource(source)
            ),
        }
        IrqReturn::Handled
    }
}
