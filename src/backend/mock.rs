use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use log::warn;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::error::{AppError, EBUSY};
use crate::gpio::{
    Direction, GpioBackend, InterruptId, IrqReturn, Level, SharedHandler, Trigger,
};

pub const MOCK_LINE_COUNT: u32 = 54;
pub const MOCK_IRQ_BASE: u32 = 160;

#[derive(Default)]
struct MockLine {
    owner: Option<String>,
    direction: Option<Direction>,
    level: Level,
    debounce_ms: u64,
    exported: bool,
    last_edge: Option<Duration>,
}

struct MockIrq {
    line: u32,
    trigger: Trigger,
    handler: SharedHandler,
}

#[derive(Default)]
struct Injected {
    claim: FxHashMap<u32, AppError>,
    direction: FxHashMap<u32, AppError>,
    interrupt: FxHashMap<InterruptId, AppError>,
}

/// In-memory platform with a virtual clock, edge injection and fault injection.
pub struct MockGpioBackend {
    num_lines: u32,
    lines: Mutex<FxHashMap<u32, MockLine>>, // keyed by line offset
    irqs: Mutex<FxHashMap<InterruptId, MockIrq>>,
    injected: Mutex<Injected>,
    clock: Mutex<Duration>,
    faults: AtomicUsize,
}

impl Default for MockGpioBackend {
    fn default() -> Self {
        Self::new(MOCK_LINE_COUNT)
    }
}

impl MockGpioBackend {
    pub fn new(num_lines: u32) -> Self {
        Self {
            num_lines,
            lines: Mutex::new(FxHashMap::default()),
            irqs: Mutex::new(FxHashMap::default()),
            injected: Mutex::new(Injected::default()),
            clock: Mutex::new(Duration::ZERO),
            faults: AtomicUsize::new(0),
        }
    }

    pub fn fail_claim(&self, line: u32, error: AppError) {
        self.injected.lock().claim.insert(line, error);
    }

    pub fn fail_direction(&self, line: u32, error: AppError) {
        self.injected.lock().direction.insert(line, error);
    }

    pub fn fail_interrupt(&self, irq: InterruptId, error: AppError) {
        self.injected.lock().interrupt.insert(irq, error);
    }

    pub fn clear_injected(&self) {
        *self.injected.lock() = Injected::default();
    }

    /// Moves the virtual clock used for debouncing forward.
    pub fn advance(&self, by: Duration) {
        *self.clock.lock() += by;
    }

    /// Simulates a button press: a falling edge on `line`. Returns what the
    /// registered handler reported, or `None` when the edge was debounced or
    /// nothing is listening.
    pub fn press(&self, line: u32) -> Option<IrqReturn> {
        self.edge(line, Trigger::Falling, Level::Low)
    }

    /// Simulates a button being let go: a rising edge on `line`.
    pub fn lift(&self, line: u32) -> Option<IrqReturn> {
        self.edge(line, Trigger::Rising, Level::High)
    }

    /// Delivers `irq` directly, bypassing line state and debounce.
    pub fn fire(&self, irq: InterruptId) -> Option<IrqReturn> {
        let handler = self.irqs.lock().get(&irq).map(|i| i.handler.clone())?;
        Some(handler.on_edge(irq))
    }

    fn edge(&self, line: u32, observed: Trigger, level: Level) -> Option<IrqReturn> {
        let now = *self.clock.lock();
        let target = self
            .irqs
            .lock()
            .iter()
            .find(|(_, i)| i.line == line && i.trigger.matches(observed))
            .map(|(id, i)| (*id, i.handler.clone()));

        {
            let mut lines = self.lines.lock();
            let state = lines.get_mut(&line)?;
            if state.owner.is_none() || state.direction != Some(Direction::Input) {
                return None;
            }
            state.level = level;

            // only edges that would raise an interrupt restart the debounce window
            target.as_ref()?;
            let debounce = Duration::from_millis(state.debounce_ms);
            let allow = state
                .last_edge
                .map(|t| now.saturating_sub(t) >= debounce)
                .unwrap_or(true);
            if !allow {
                return None;
            }
            state.last_edge = Some(now);
        }

        let (irq, handler) = target?;
        Some(handler.on_edge(irq))
    }

    /// Physical level of `line`, kept across claim and release.
    pub fn level(&self, line: u32) -> Level {
        self.lines
            .lock()
            .get(&line)
            .map(|l| l.level)
            .unwrap_or_default()
    }

    pub fn owner(&self, line: u32) -> Option<String> {
        self.lines.lock().get(&line).and_then(|l| l.owner.clone())
    }

    pub fn is_exported(&self, line: u32) -> bool {
        self.lines
            .lock()
            .get(&line)
            .map(|l| l.exported)
            .unwrap_or(false)
    }

    pub fn debounce_ms(&self, line: u32) -> Option<u64> {
        self.lines
            .lock()
            .get(&line)
            .filter(|l| l.owner.is_some())
            .map(|l| l.debounce_ms)
    }

    pub fn claimed_lines(&self) -> Vec<u32> {
        let mut claimed: Vec<u32> = self
            .lines
            .lock()
            .iter()
            .filter(|(_, l)| l.owner.is_some())
            .map(|(id, _)| *id)
            .collect();
        claimed.sort_unstable();
        claimed
    }

    pub fn registered_interrupts(&self) -> Vec<InterruptId> {
        let mut irqs: Vec<InterruptId> = self.irqs.lock().keys().copied().collect();
        irqs.sort_unstable();
        irqs
    }

    /// Releases of unclaimed lines and frees of unregistered interrupts seen so far.
    pub fn faults(&self) -> usize {
        self.faults.load(Ordering::Relaxed)
    }

    fn with_claimed<T>(
        &self,
        line: u32,
        f: impl FnOnce(&mut MockLine) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let mut lines = self.lines.lock();
        match lines.get_mut(&line) {
            Some(state) if state.owner.is_some() => f(state),
            _ => Err(AppError::NotConfigured(line)),
        }
    }
}

impl GpioBackend for MockGpioBackend {
    fn is_valid(&self, line: u32) -> bool {
        line < self.num_lines
    }

    fn claim(&self, line: u32, tag: &str) -> Result<(), AppError> {
        if !self.is_valid(line) {
            return Err(AppError::ResourceUnavailable(line));
        }
        if let Some(e) = self.injected.lock().claim.get(&line) {
            return Err(e.clone());
        }

        let mut lines = self.lines.lock();
        let state = lines.entry(line).or_default();
        if state.owner.is_some() {
            return Err(AppError::AlreadyClaimed(line));
        }
        state.owner = Some(tag.to_string());
        state.direction = None;
        state.exported = false;
        state.last_edge = None;
        Ok(())
    }

    fn set_direction(&self, line: u32, direction: Direction) -> Result<(), AppError> {
        if let Some(e) = self.injected.lock().direction.get(&line) {
            return Err(e.clone());
        }
        self.with_claimed(line, |state| {
            state.direction = Some(direction);
            if let Direction::Output { initial } = direction {
                state.level = initial;
            }
            Ok(())
        })
    }

    fn set_level(&self, line: u32, level: Level) -> Result<(), AppError> {
        self.with_claimed(line, |state| match state.direction {
            Some(Direction::Output { .. }) => {
                state.level = level;
                Ok(())
            }
            _ => Err(AppError::InvalidState(format!(
                "line {line} must be in output mode to set value"
            ))),
        })
    }

    fn get_level(&self, line: u32) -> Result<Level, AppError> {
        self.with_claimed(line, |state| Ok(state.level))
    }

    fn set_debounce(&self, line: u32, debounce_ms: u64) -> Result<(), AppError> {
        self.with_claimed(line, |state| {
            state.debounce_ms = debounce_ms;
            Ok(())
        })
    }

    fn set_visible(&self, line: u32, visible: bool) -> Result<(), AppError> {
        self.with_claimed(line, |state| {
            state.exported = visible;
            Ok(())
        })
    }

    fn to_interrupt(&self, line: u32) -> Result<InterruptId, AppError> {
        self.with_claimed(line, |state| match state.direction {
            Some(Direction::Input) => Ok(InterruptId(MOCK_IRQ_BASE + line)),
            _ => Err(AppError::InvalidState(format!(
                "line {line} must be an input to map an interrupt"
            ))),
        })
    }

    fn register_interrupt(
        &self,
        irq: InterruptId,
        trigger: Trigger,
        _tag: &str,
        handler: SharedHandler,
    ) -> Result<(), AppError> {
        if let Some(e) = self.injected.lock().interrupt.get(&irq) {
            return Err(e.clone());
        }

        let line = irq.0.checked_sub(MOCK_IRQ_BASE).unwrap_or(u32::MAX);
        self.to_interrupt(line)?;

        let mut irqs = self.irqs.lock();
        if irqs.contains_key(&irq) {
            return Err(AppError::platform(-EBUSY, format!("{irq} already requested")));
        }
        irqs.insert(
            irq,
            MockIrq {
                line,
                trigger,
                handler,
            },
        );
        Ok(())
    }

    fn unregister_interrupt(&self, irq: InterruptId) {
        if self.irqs.lock().remove(&irq).is_none() {
            warn!("trying to free already-free {irq}");
            self.faults.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn release(&self, line: u32) {
        let mut lines = self.lines.lock();
        match lines.get_mut(&line) {
            Some(state) if state.owner.is_some() => {
                state.owner = None;
                state.direction = None;
                state.exported = false;
            }
            _ => {
                warn!("trying to free unclaimed line {line}");
                self.faults.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
