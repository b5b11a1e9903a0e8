use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::dispatcher::{Button, LED_OFF};
use crate::error::{AppError, EBUSY};
use crate::gpio::{Direction, GpioBackend, InterruptId, Level, SharedHandler, Trigger};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Led,
    OnButton,
    OffButton,
}

impl Slot {
    pub fn button(self) -> Option<Button> {
        match self {
            Slot::Led => None,
            Slot::OnButton => Some(Button::On),
            Slot::OffButton => Some(Button::Off),
        }
    }
}

impl From<Button> for Slot {
    fn from(button: Button) -> Self {
        match button {
            Button::On => Slot::OnButton,
            Button::Off => Slot::OffButton,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Output { initial: Level },
    Input { debounce_ms: u64 },
}

/// A claimed line. Dropping it drives an output line OFF, unexports and
/// releases the line.
pub struct PinBinding<B: GpioBackend> {
    backend: Arc<B>,
    line: u32,
    mode: PinMode,
}

impl<B: GpioBackend> PinBinding<B> {
    fn claim(backend: Arc<B>, line: u32, mode: PinMode, tag: &str) -> Result<Self, AppError> {
        backend.claim(line, tag)?;
        // from here on a failed step releases the claim through Drop
        let binding = Self {
            backend,
            line,
            mode,
        };

        match mode {
            PinMode::Output { initial } => {
                binding
                    .backend
                    .set_direction(line, Direction::Output { initial })?;
                binding.backend.set_level(line, initial)?;
            }
            PinMode::Input { debounce_ms } => {
                binding.backend.set_direction(line, Direction::Input)?;
                binding.backend.set_debounce(line, debounce_ms)?;
            }
        }
        binding.backend.set_visible(line, true)?;
        Ok(binding)
    }
}

impl<B: GpioBackend> Drop for PinBinding<B> {
    fn drop(&mut self) {
        if let PinMode::Output { .. } = self.mode
            && let Err(e) = self.backend.set_level(self.line, LED_OFF)
        {
            warn!("failed to force line {} off: {e}", self.line);
        }
        if let Err(e) = self.backend.set_visible(self.line, false) {
            warn!("failed to unexport line {}: {e}", self.line);
        }
        self.backend.release(self.line);
        debug!("released line {}", self.line);
    }
}

/// A registered interrupt handler, unregistered on drop.
pub struct InterruptBinding<B: GpioBackend> {
    backend: Arc<B>,
    irq: InterruptId,
}

impl<B: GpioBackend> Drop for InterruptBinding<B> {
    fn drop(&mut self) {
        self.backend.unregister_interrupt(self.irq);
        debug!("freed {}", self.irq);
    }
}

struct Bindings<B: GpioBackend> {
    led: Option<PinBinding<B>>,
    on_button: Option<PinBinding<B>>,
    off_button: Option<PinBinding<B>>,
    on_irq: Option<InterruptBinding<B>>,
    off_irq: Option<InterruptBinding<B>>,
}

impl<B: GpioBackend> Bindings<B> {
    fn pin_mut(&mut self, slot: Slot) -> &mut Option<PinBinding<B>> {
        match slot {
            Slot::Led => &mut self.led,
            Slot::OnButton => &mut self.on_button,
            Slot::OffButton => &mut self.off_button,
        }
    }

    fn irq_mut(&mut self, button: Button) -> &mut Option<InterruptBinding<B>> {
        match button {
            Button::On => &mut self.on_irq,
            Button::Off => &mut self.off_irq,
        }
    }
}

/// Owns every line and interrupt of one controller.
pub struct ResourceManager<B: GpioBackend> {
    backend: Arc<B>,
    tag: String,
    bindings: Mutex<Bindings<B>>,
}

impl<B: GpioBackend> ResourceManager<B> {
    pub fn new(backend: Arc<B>, tag: impl Into<String>) -> Self {
        Self {
            backend,
            tag: tag.into(),
            bindings: Mutex::new(Bindings {
                led: None,
                on_button: None,
                off_button: None,
                on_irq: None,
                off_irq: None,
            }),
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Claims `line`, configures it for `mode` and exports it into `slot`.
    pub fn acquire(&self, slot: Slot, line: u32, mode: PinMode) -> Result<(), AppError> {
        if !self.backend.is_valid(line) {
            return Err(AppError::ResourceUnavailable(line));
        }

        let mut bindings = self.bindings.lock();
        let entry = bindings.pin_mut(slot);
        if let Some(held) = entry.as_ref() {
            return Err(AppError::AlreadyClaimed(held.line));
        }
        *entry = Some(PinBinding::claim(
            self.backend.clone(),
            line,
            mode,
            &self.tag,
        )?);
        Ok(())
    }

    pub fn line_of(&self, slot: Slot) -> Option<u32> {
        self.bindings.lock().pin_mut(slot).as_ref().map(|b| b.line)
    }

    pub fn interrupt_for(&self, button: Button) -> Result<InterruptId, AppError> {
        let slot = Slot::from(button);
        let line = self
            .line_of(slot)
            .ok_or_else(|| AppError::InvalidState(format!("{slot:?} line not acquired")))?;
        self.backend.to_interrupt(line)
    }

    /// Registers `handler` for the falling edge of the button's input line.
    pub fn bind_interrupt(
        &self,
        button: Button,
        irq: InterruptId,
        handler: SharedHandler,
    ) -> Result<(), AppError> {
        let mut bindings = self.bindings.lock();
        let slot = Slot::from(button);
        let Some(line) = bindings.pin_mut(slot).as_ref().map(|b| b.line) else {
            return Err(AppError::InvalidState(format!(
                "{slot:?} line not acquired"
            )));
        };
        let entry = bindings.irq_mut(button);
        if entry.is_some() {
            return Err(AppError::platform(
                -EBUSY,
                format!("{irq} of line {line} already bound"),
            ));
        }

        self.backend
            .register_interrupt(irq, Trigger::Falling, &self.tag, handler)?;
        *entry = Some(InterruptBinding {
            backend: self.backend.clone(),
            irq,
        });
        Ok(())
    }

    /// Releases whichever slot holds `line`. Unknown lines are ignored.
    pub fn release(&self, line: u32) {
        let mut bindings = self.bindings.lock();
        for slot in [Slot::Led, Slot::OnButton, Slot::OffButton] {
            if bindings.pin_mut(slot).as_ref().map(|b| b.line) != Some(line) {
                continue;
            }
            if let Some(button) = slot.button() {
                drop(bindings.irq_mut(button).take());
            }
            drop(bindings.pin_mut(slot).take());
        }
    }

    /// Releases everything still held: the interrupt bindings, the LED line
    /// (driven OFF), then the button lines. Safe to call repeatedly and from
    /// any partially acquired state.
    pub fn release_all(&self) {
        let mut bindings = self.bindings.lock();
        // no handler may write the LED once it has been forced off
        drop(bindings.on_irq.take());
        drop(bindings.off_irq.take());
        drop(bindings.led.take());
        drop(bindings.on_button.take());
        drop(bindings.off_button.take());
    }

    /// Pin and interrupt bindings currently held.
    pub fn outstanding(&self) -> usize {
        let bindings = self.bindings.lock();
        [
            bindings.led.is_some(),
            bindings.on_button.is_some(),
            bindings.off_button.is_some(),
            bindings.on_irq.is_some(),
            bindings.off_irq.is_some(),
        ]
        .into_iter()
        .filter(|held| *held)
        .count()
    }
}

impl<B: GpioBackend> Drop for ResourceManager<B> {
    fn drop(&mut self) {
        self.release_all();
    }
}
