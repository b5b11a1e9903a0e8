use std::sync::Arc;
use std::time::Duration;

use ledctl::backend::mock::MOCK_IRQ_BASE;
use ledctl::{
    AppError, ControllerConfig, Direction, GpioBackend, InterruptId, IrqReturn, LedController,
    Level, MockGpioBackend, PressCounts, SharedHandler, Trigger,
};

const LED: u32 = 21;
const ON: u32 = 16;
const OFF: u32 = 26;

fn led1() -> ControllerConfig {
    ControllerConfig::new("LED1", LED, ON, OFF)
}

fn irq(line: u32) -> InterruptId {
    InterruptId(MOCK_IRQ_BASE + line)
}

fn started(backend: &Arc<MockGpioBackend>) -> LedController<MockGpioBackend> {
    let mut controller = LedController::new(led1(), backend.clone());
    controller.start().expect("controller starts");
    controller
}

fn assert_nothing_held(backend: &MockGpioBackend) {
    assert!(backend.claimed_lines().is_empty());
    assert!(backend.registered_interrupts().is_empty());
    assert_eq!(backend.faults(), 0);
}

#[test]
fn start_claims_exports_and_binds_all_lines() {
    let backend = Arc::new(MockGpioBackend::default());
    let controller = started(&backend);

    assert!(controller.is_running());
    assert_eq!(controller.outstanding(), 5);
    assert_eq!(backend.claimed_lines(), vec![ON, LED, OFF]);
    assert_eq!(backend.registered_interrupts(), vec![irq(ON), irq(OFF)]);
    for line in [LED, ON, OFF] {
        assert!(backend.is_exported(line));
        assert_eq!(backend.owner(line).as_deref(), Some("LED1"));
    }
    assert_eq!(backend.debounce_ms(ON), Some(200));
    assert_eq!(backend.debounce_ms(OFF), Some(200));
    assert_eq!(controller.output_level(), Ok(Level::Low));
}

#[test]
fn start_then_stop_without_edges() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut controller = started(&backend);

    let counts = controller.stop();

    assert_eq!(counts, PressCounts { on: 0, off: 0 });
    assert!(!controller.is_running());
    assert_eq!(controller.outstanding(), 0);
    assert_eq!(backend.level(LED), Level::Low);
    assert!(!backend.is_exported(LED));
    assert_nothing_held(&backend);
}

#[test]
fn one_on_press_then_two_off_presses() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut controller = started(&backend);

    assert_eq!(backend.press(ON), Some(IrqReturn::Handled));
    assert_eq!(controller.output_level(), Ok(Level::High));
    assert_eq!(controller.counts(), PressCounts { on: 1, off: 0 });

    backend.advance(Duration::from_millis(250));
    assert_eq!(backend.press(OFF), Some(IrqReturn::Handled));
    backend.advance(Duration::from_millis(250));
    assert_eq!(backend.press(OFF), Some(IrqReturn::Handled));

    assert_eq!(controller.output_level(), Ok(Level::Low));
    assert_eq!(controller.stop(), PressCounts { on: 1, off: 2 });
}

#[test]
fn bounces_inside_debounce_window_are_dropped() {
    let backend = Arc::new(MockGpioBackend::default());
    let controller = started(&backend);

    assert_eq!(backend.press(ON), Some(IrqReturn::Handled));
    backend.advance(Duration::from_millis(50));
    assert_eq!(backend.press(ON), None);
    backend.advance(Duration::from_millis(200));
    assert_eq!(backend.press(ON), Some(IrqReturn::Handled));

    assert_eq!(controller.counts(), PressCounts { on: 2, off: 0 });
}

#[test]
fn releasing_a_button_does_not_dispatch() {
    let backend = Arc::new(MockGpioBackend::default());
    let controller = started(&backend);

    assert_eq!(backend.lift(ON), None);
    assert_eq!(controller.counts(), PressCounts::default());
}

#[test]
fn releasing_a_button_does_not_delay_the_next_press() {
    let backend = Arc::new(MockGpioBackend::default());
    let controller = started(&backend);

    assert_eq!(backend.press(ON), Some(IrqReturn::Handled));
    backend.advance(Duration::from_millis(100));
    assert_eq!(backend.lift(ON), None);
    assert_eq!(backend.level(ON), Level::High);
    backend.advance(Duration::from_millis(150));
    assert_eq!(backend.press(ON), Some(IrqReturn::Handled));

    assert_eq!(controller.counts(), PressCounts { on: 2, off: 0 });
}

#[test]
fn invalid_output_line_claims_nothing() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut controller =
        LedController::new(ControllerConfig::new("LED1", 99, ON, OFF), backend.clone());

    let err = controller.start().unwrap_err();

    assert_eq!(err, AppError::InvalidDevice(99));
    assert_eq!(err.code(), -19);
    assert!(!controller.is_running());
    assert_nothing_held(&backend);
}

#[test]
fn second_input_claim_failure_rolls_back() {
    let backend = Arc::new(MockGpioBackend::default());
    let injected = AppError::platform(-16, "line busy");
    backend.fail_claim(OFF, injected.clone());
    let mut controller = LedController::new(led1(), backend.clone());

    let err = controller.start().unwrap_err();

    assert_eq!(err, injected);
    assert_eq!(err.code(), -16);
    assert!(err.is_acquire_failure());
    assert_eq!(controller.outstanding(), 0);
    assert_eq!(backend.level(LED), Level::Low);
    assert_nothing_held(&backend);

    backend.clear_injected();
    assert_eq!(controller.start(), Ok(()));
    assert_eq!(controller.outstanding(), 5);
}

#[test]
fn on_interrupt_failure_rolls_back() {
    let backend = Arc::new(MockGpioBackend::default());
    let injected = AppError::platform(-22, "no such irq");
    backend.fail_interrupt(irq(ON), injected.clone());
    let mut controller = LedController::new(led1(), backend.clone());

    assert_eq!(controller.start(), Err(injected));
    assert_nothing_held(&backend);
}

#[test]
fn off_interrupt_failure_detaches_on_binding() {
    let backend = Arc::new(MockGpioBackend::default());
    let injected = AppError::platform(-16, "irq busy");
    backend.fail_interrupt(irq(OFF), injected.clone());
    let mut controller = LedController::new(led1(), backend.clone());

    assert_eq!(controller.start(), Err(injected));
    assert_eq!(backend.press(ON), None);
    assert_nothing_held(&backend);
}

#[test]
fn line_held_by_another_owner_is_already_claimed() {
    let backend = Arc::new(MockGpioBackend::default());
    backend.claim(ON, "someone-else").unwrap();
    let mut controller = LedController::new(led1(), backend.clone());

    assert_eq!(controller.start(), Err(AppError::AlreadyClaimed(ON)));
    assert_eq!(backend.claimed_lines(), vec![ON]);
    assert_eq!(backend.owner(ON).as_deref(), Some("someone-else"));
    assert_eq!(backend.faults(), 0);
}

#[test]
fn start_twice_is_rejected() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut controller = started(&backend);

    assert_eq!(
        controller.start(),
        Err(AppError::AlreadyStarted("LED1".into()))
    );
    assert!(controller.is_running());
    assert_eq!(controller.outstanding(), 5);
}

#[test]
fn stop_twice_releases_once() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut controller = started(&backend);
    backend.press(ON);

    assert_eq!(controller.stop(), PressCounts { on: 1, off: 0 });
    assert_eq!(controller.stop(), PressCounts { on: 1, off: 0 });
    assert_nothing_held(&backend);
}

#[test]
fn stop_without_start_is_harmless() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut controller = LedController::new(led1(), backend.clone());

    assert_eq!(controller.stop(), PressCounts::default());
    assert_nothing_held(&backend);
}

#[test]
fn stop_turns_the_led_off() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut controller = started(&backend);
    backend.press(ON);
    assert_eq!(backend.level(LED), Level::High);

    controller.stop();

    assert_eq!(backend.level(LED), Level::Low);
}

#[test]
fn dropping_a_running_controller_releases_everything() {
    let backend = Arc::new(MockGpioBackend::default());
    {
        let _controller = started(&backend);
        backend.press(ON);
    }
    assert_eq!(backend.level(LED), Level::Low);
    assert_nothing_held(&backend);
}

#[test]
fn counters_survive_a_restart() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut controller = started(&backend);
    backend.press(ON);
    controller.stop();

    controller.start().unwrap();
    backend.advance(Duration::from_millis(250));
    backend.press(ON);
    backend.press(OFF);

    assert_eq!(controller.stop(), PressCounts { on: 2, off: 1 });
    assert_nothing_held(&backend);
}

#[test]
fn two_controllers_are_independent() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut led1 = started(&backend);
    let mut led2 = LedController::new(ControllerConfig::new("LED2", 20, 19, 13), backend.clone());
    led2.start().unwrap();

    backend.press(ON);
    backend.press(13);

    assert_eq!(backend.level(LED), Level::High);
    assert_eq!(backend.level(20), Level::Low);
    assert_eq!(led1.counts(), PressCounts { on: 1, off: 0 });
    assert_eq!(led2.counts(), PressCounts { on: 0, off: 1 });

    led1.stop();
    assert_eq!(backend.claimed_lines(), vec![13, 19, 20]);
    backend.advance(Duration::from_millis(250));
    backend.press(19);
    assert_eq!(backend.level(20), Level::High);

    led2.stop();
    assert_nothing_held(&backend);
}

#[test]
fn overlapping_controller_fails_without_disturbing_the_first() {
    let backend = Arc::new(MockGpioBackend::default());
    let led1 = started(&backend);
    let mut clash = LedController::new(ControllerConfig::new("LED2", 20, 19, OFF), backend.clone());

    assert_eq!(clash.start(), Err(AppError::AlreadyClaimed(OFF)));
    assert_eq!(backend.claimed_lines(), vec![ON, LED, OFF]);
    assert_eq!(backend.registered_interrupts(), vec![irq(ON), irq(OFF)]);
    assert_eq!(backend.owner(OFF).as_deref(), Some("LED1"));
    assert_eq!(backend.faults(), 0);
    assert!(led1.is_running());
}

/// Delivers the "on" interrupt while the LED line is being unexported, the
/// way a listener thread can race with teardown on real hardware.
struct EdgeDuringTeardown {
    inner: MockGpioBackend,
}

impl GpioBackend for EdgeDuringTeardown {
    fn is_valid(&self, line: u32) -> bool {
        self.inner.is_valid(line)
    }

    fn claim(&self, line: u32, tag: &str) -> Result<(), AppError> {
        self.inner.claim(line, tag)
    }

    fn set_direction(&self, line: u32, direction: Direction) -> Result<(), AppError> {
        self.inner.set_direction(line, direction)
    }

    fn set_level(&self, line: u32, level: Level) -> Result<(), AppError> {
        self.inner.set_level(line, level)
    }

    fn get_level(&self, line: u32) -> Result<Level, AppError> {
        self.inner.get_level(line)
    }

    fn set_debounce(&self, line: u32, debounce_ms: u64) -> Result<(), AppError> {
        self.inner.set_debounce(line, debounce_ms)
    }

    fn set_visible(&self, line: u32, visible: bool) -> Result<(), AppError> {
        if line == LED && !visible {
            self.inner.fire(irq(ON));
        }
        self.inner.set_visible(line, visible)
    }

    fn to_interrupt(&self, line: u32) -> Result<InterruptId, AppError> {
        self.inner.to_interrupt(line)
    }

    fn register_interrupt(
        &self,
        irq: InterruptId,
        trigger: Trigger,
        tag: &str,
        handler: SharedHandler,
    ) -> Result<(), AppError> {
        self.inner.register_interrupt(irq, trigger, tag, handler)
    }

    fn unregister_interrupt(&self, irq: InterruptId) {
        self.inner.unregister_interrupt(irq)
    }

    fn release(&self, line: u32) {
        self.inner.release(line)
    }
}

#[test]
fn edge_during_teardown_leaves_the_led_off() {
    let backend = Arc::new(EdgeDuringTeardown {
        inner: MockGpioBackend::default(),
    });
    let mut controller = LedController::new(led1(), backend.clone());
    controller.start().unwrap();

    assert_eq!(controller.stop(), PressCounts { on: 0, off: 0 });
    assert_eq!(backend.inner.level(LED), Level::Low);
    assert_nothing_held(&backend.inner);
}
