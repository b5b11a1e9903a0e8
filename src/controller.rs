use std::sync::Arc;

use log::{error, info};

use crate::config::ControllerConfig;
use crate::dispatcher::{Button, EdgeDispatcher, LED_OFF, PressCounters, PressCounts};
use crate::error::AppError;
use crate::gpio::{GpioBackend, Level, SharedHandler};
use crate::notify::NotifyQueue;
use crate::resource::{PinMode, ResourceManager, Slot};

/// One LED driven by an "on" and an "off" button.
pub struct LedController<B: GpioBackend + 'static> {
    config: ControllerConfig,
    name: Arc<str>,
    resources: ResourceManager<B>,
    counters: Arc<PressCounters>,
    notifier: Option<NotifyQueue>,
    running: bool,
}

impl<B: GpioBackend + 'static> LedController<B> {
    pub fn new(config: ControllerConfig, backend: Arc<B>) -> Self {
        let name: Arc<str> = Arc::from(config.name.as_str());
        Self {
            resources: ResourceManager::new(backend, config.name.clone()),
            config,
            name,
            counters: Arc::new(PressCounters::default()),
            notifier: None,
            running: false,
        }
    }

    pub fn with_notifier(mut self, notifier: NotifyQueue) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn counts(&self) -> PressCounts {
        self.counters.snapshot()
    }

    /// Bindings still held by this controller.
    pub fn outstanding(&self) -> usize {
        self.resources.outstanding()
    }

    /// Current LED level as read back from the backend.
    pub fn output_level(&self) -> Result<Level, AppError> {
        self.resources.backend().get_level(self.config.output_pin)
    }

    /// Claims the three lines and registers the dispatcher on both buttons.
    /// Any failure releases everything claimed so far and returns the
    /// backend's error unchanged.
    pub fn start(&mut self) -> Result<(), AppError> {
        if self.running {
            return Err(AppError::AlreadyStarted(self.config.name.clone()));
        }
        info!("{}: initializing", self.name);

        if !self.resources.backend().is_valid(self.config.output_pin) {
            error!(
                "{}: invalid LED line {}",
                self.name, self.config.output_pin
            );
            return Err(AppError::InvalidDevice(self.config.output_pin));
        }

        if let Err(e) = self.bring_up() {
            self.resources.release_all();
            return Err(e);
        }

        self.running = true;
        info!(
            "{}: LED on line {}, buttons on lines {} (on) and {} (off)",
            self.name, self.config.output_pin, self.config.on_pin, self.config.off_pin
        );
        Ok(())
    }

    fn bring_up(&self) -> Result<(), AppError> {
        let cfg = &self.config;
        let input = PinMode::Input {
            debounce_ms: cfg.debounce_ms,
        };

        self.resources
            .acquire(Slot::Led, cfg.output_pin, PinMode::Output { initial: LED_OFF })?;
        self.resources.acquire(Slot::OnButton, cfg.on_pin, input)?;
        self.resources.acquire(Slot::OffButton, cfg.off_pin, input)?;

        let on_irq = self.resources.interrupt_for(Button::On)?;
        let off_irq = self.resources.interrupt_for(Button::Off)?;

        let mut dispatcher = EdgeDispatcher::new(
            self.name.clone(),
            self.resources.backend().clone(),
            cfg.output_pin,
            on_irq,
            off_irq,
            self.counters.clone(),
        );
        if let Some(notifier) = &self.notifier {
            dispatcher = dispatcher.with_notifications(
                notifier.clone(),
                cfg.on_notify.clone(),
                cfg.off_notify.clone(),
            );
        }
        let handler: SharedHandler = Arc::new(dispatcher);

        self.resources
            .bind_interrupt(Button::On, on_irq, handler.clone())
            .inspect_err(|e| error!("{}: failed to register on button: {e}", self.name))?;
        self.resources
            .bind_interrupt(Button::Off, off_irq, handler)
            .inspect_err(|e| error!("{}: failed to register off button: {e}", self.name))?;
        Ok(())
    }

    /// Detaches both buttons, drives the LED off and releases every line.
    /// Returns the press counts accumulated since construction.
    pub fn stop(&mut self) -> PressCounts {
        // interrupts are detached first so the counters are final when read
        self.resources.release_all();
        self.running = false;

        let counts = self.counters.snapshot();
        info!("{}: on button was pressed {} times", self.name, counts.on);
        info!("{}: off button was pressed {} times", self.name, counts.off);
        info!("{}: uninitialized", self.name);
        counts
    }
}
