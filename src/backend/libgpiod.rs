use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, yield_now};
use std::time::Duration;

use libgpiod::{chip::Chip, line, line::EventClock, request};
use parking_lot::{FairMutex, Mutex};
use rustc_hash::FxHashMap;

use crate::error::{AppError, EBUSY, EIO};
use crate::gpio::{
    Direction, GpioBackend, InterruptId, IrqReturn, Level, SharedHandler, Trigger,
};

const LIBGPIOD_BACKEND_EVENT_BUFFER_CAPACITY: usize = 64;
const LIBGPIOD_BACKEND_EVENT_WAIT_TIMEOUT_MS: Duration = Duration::from_millis(10);

fn gpio_err(what: &str, e: impl std::fmt::Display) -> AppError {
    AppError::platform(-EIO, format!("{what}: {e}"))
}

type SharedRequest = Arc<FairMutex<request::Request>>;

struct LineHandle {
    tag: String,
    direction: Option<Direction>,
    debounce_ms: u64,
    edge: Option<Trigger>,
    request: Option<SharedRequest>,
    listener: Option<EdgeListener>, // drop before the request
}

impl LineHandle {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            direction: None,
            debounce_ms: 0,
            edge: None,
            request: None,
            listener: None,
        }
    }

    fn request(&self, offset: u32) -> Result<&SharedRequest, AppError> {
        self.request.as_ref().ok_or_else(|| {
            AppError::InvalidState(format!("line {offset} has no direction set"))
        })
    }
}

struct EdgeListener {
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EdgeListener {
    fn new(
        irq: InterruptId,
        request: SharedRequest,
        handler: SharedHandler,
    ) -> Result<Self, AppError> {
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_flag = cancel.clone();
        let mut buffer = request::Buffer::new(LIBGPIOD_BACKEND_EVENT_BUFFER_CAPACITY)
            .map_err(|e| gpio_err("event buffer", e))?;

        let handle = std::thread::spawn(move || {
            while !cancel_flag.load(Ordering::Relaxed) {
                let fired = {
                    let req = request.lock();
                    match req.wait_edge_events(Some(LIBGPIOD_BACKEND_EVENT_WAIT_TIMEOUT_MS)) {
                        Ok(false) => 0,
                        Ok(true) => match req.read_edge_events(&mut buffer) {
                            Ok(events) => events.filter(|evt| evt.is_ok()).count(),
                            Err(e) => {
                                warn!("read edge events error for {irq}: {e}");
                                0
                            }
                        },
                        Err(e) => {
                            warn!("wait edge events error for {irq}: {e}");
                            0
                        }
                    }
                };
                if fired == 0 {
                    yield_now();
                    continue;
                }

                // the request lock is not held while the handler runs
                for _ in 0..fired {
                    if handler.on_edge(irq) == IrqReturn::None {
                        debug!("{irq} not handled");
                    }
                }
            }
        });

        Ok(Self {
            cancel,
            handle: Some(handle),
        })
    }
}

impl Drop for EdgeListener {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Linux GPIO character device backend. Interrupt ids are line offsets;
/// each registered interrupt gets a listener thread reading kernel edge events.
pub struct LibgpiodBackend {
    chip_path: PathBuf,
    num_lines: u32,
    lines: Mutex<FxHashMap<u32, LineHandle>>, // keyed by line offset
}

impl LibgpiodBackend {
    pub fn new<P: AsRef<Path>>(chip_path: P) -> Result<Self, AppError> {
        let chip_path = chip_path.as_ref().to_path_buf();
        let chip = Self::open_chip(&chip_path)?;
        let info = chip.info().map_err(|e| gpio_err("chip info", e))?;
        let num_lines = u32::try_from(info.num_lines()).unwrap_or(u32::MAX);
        debug!("{} has {num_lines} lines", chip_path.display());

        Ok(Self {
            chip_path,
            num_lines,
            lines: Mutex::new(FxHashMap::default()),
        })
    }

    fn open_chip(path: &Path) -> Result<Chip, AppError> {
        let p = path.to_path_buf();
        Chip::open(&p).map_err(|e| gpio_err(&format!("open chip {}", path.display()), e))
    }

    fn make_line_settings(
        direction: Direction,
        debounce_ms: u64,
        edge: Option<Trigger>,
    ) -> Result<line::Settings, AppError> {
        let mut ls = line::Settings::new().map_err(|e| gpio_err("libgpiod settings", e))?;

        match direction {
            Direction::Output { initial } => {
                ls.set_direction(line::Direction::Output)
                    .map_err(|e| gpio_err("set direction", e))?;
                ls.set_output_value(to_value(initial))
                    .map_err(|e| gpio_err("set output value", e))?;
            }
            Direction::Input => {
                ls.set_direction(line::Direction::Input)
                    .map_err(|e| gpio_err("set direction", e))?;
                ls.set_debounce_period(Duration::from_millis(debounce_ms));
                if let Some(edge) = edge {
                    let edge = match edge {
                        Trigger::Rising => line::Edge::Rising,
                        Trigger::Falling => line::Edge::Falling,
                        Trigger::Both => line::Edge::Both,
                    };
                    ls.set_edge_detection(Some(edge))
                        .map_err(|e| gpio_err("set edge detection", e))?;
                    ls.set_event_clock(EventClock::Monotonic)
                        .map_err(|e| gpio_err("set event clock", e))?;
                }
            }
        }
        Ok(ls)
    }

    fn make_line_config(offset: u32, settings: line::Settings) -> Result<line::Config, AppError> {
        let mut cfg = line::Config::new().map_err(|e| gpio_err("line config", e))?;
        cfg.add_line_settings(&[offset], settings)
            .map_err(|e| gpio_err("line config add settings", e))?;
        Ok(cfg)
    }

    fn request_line(&self, tag: &str, line_cfg: &line::Config) -> Result<request::Request, AppError> {
        let chip = Self::open_chip(&self.chip_path)?;
        let mut req_cfg = request::Config::new().map_err(|e| gpio_err("request config", e))?;
        req_cfg
            .set_consumer(tag)
            .map_err(|e| gpio_err("request consumer", e))?;
        chip.request_lines(Some(&req_cfg), line_cfg)
            .map_err(|e| gpio_err("request lines", e))
    }

    /// Pushes the handle's current direction, debounce and edge to the kernel.
    fn apply(&self, offset: u32, handle: &mut LineHandle) -> Result<(), AppError> {
        let Some(direction) = handle.direction else {
            return Ok(());
        };
        let settings = Self::make_line_settings(direction, handle.debounce_ms, handle.edge)?;
        let line_cfg = Self::make_line_config(offset, settings)?;

        match &handle.request {
            Some(req) => req
                .lock()
                .reconfigure_lines(&line_cfg)
                .map_err(|e| gpio_err("reconfigure lines", e)),
            None => {
                let req = self.request_line(&handle.tag, &line_cfg)?;
                handle.request = Some(Arc::new(FairMutex::new(req)));
                Ok(())
            }
        }
    }

    fn with_claimed<T>(
        &self,
        line: u32,
        f: impl FnOnce(&mut LineHandle) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let mut lines = self.lines.lock();
        let handle = lines.get_mut(&line).ok_or(AppError::NotConfigured(line))?;
        f(handle)
    }
}

fn to_value(level: Level) -> line::Value {
    match level {
        Level::Low => line::Value::InActive,
        Level::High => line::Value::Active,
    }
}

impl GpioBackend for LibgpiodBackend {
    fn is_valid(&self, line: u32) -> bool {
        line < self.num_lines
    }

    fn claim(&self, line: u32, tag: &str) -> Result<(), AppError> {
        if !self.is_valid(line) {
            return Err(AppError::ResourceUnavailable(line));
        }

        let mut lines = self.lines.lock();
        if lines.contains_key(&line) {
            return Err(AppError::AlreadyClaimed(line));
        }
        let chip = Self::open_chip(&self.chip_path)?;
        let info = chip
            .line_info(line)
            .map_err(|e| gpio_err("line info", e))?;
        if info.is_used() {
            return Err(AppError::AlreadyClaimed(line));
        }
        lines.insert(line, LineHandle::new(tag));
        Ok(())
    }

    fn set_direction(&self, line: u32, direction: Direction) -> Result<(), AppError> {
        let mut lines = self.lines.lock();
        let handle = lines.get_mut(&line).ok_or(AppError::NotConfigured(line))?;
        handle.direction = Some(direction);
        self.apply(line, handle)
    }

    fn set_level(&self, line: u32, level: Level) -> Result<(), AppError> {
        self.with_claimed(line, |handle| {
            if !matches!(handle.direction, Some(Direction::Output { .. })) {
                return Err(AppError::InvalidState(format!(
                    "line {line} must be in output mode to set value"
                )));
            }
            handle
                .request(line)?
                .lock()
                .set_value(line, to_value(level))
                .map_err(|e| gpio_err("set value", e))?;
            Ok(())
        })
    }

    fn get_level(&self, line: u32) -> Result<Level, AppError> {
        self.with_claimed(line, |handle| {
            let value = handle
                .request(line)?
                .lock()
                .value(line)
                .map_err(|e| gpio_err("get value", e))?;
            Ok(match value {
                line::Value::InActive => Level::Low,
                line::Value::Active => Level::High,
            })
        })
    }

    fn set_debounce(&self, line: u32, debounce_ms: u64) -> Result<(), AppError> {
        let mut lines = self.lines.lock();
        let handle = lines.get_mut(&line).ok_or(AppError::NotConfigured(line))?;
        handle.debounce_ms = debounce_ms;
        self.apply(line, handle)
    }

    fn set_visible(&self, line: u32, visible: bool) -> Result<(), AppError> {
        // character device lines are always listed with their consumer label
        self.with_claimed(line, |handle| {
            debug!(
                "line {line} {} as {}",
                if visible { "exported" } else { "unexported" },
                handle.tag
            );
            Ok(())
        })
    }

    fn to_interrupt(&self, line: u32) -> Result<InterruptId, AppError> {
        self.with_claimed(line, |handle| match handle.direction {
            Some(Direction::Input) => Ok(InterruptId(line)),
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
        let line = irq.0;
        let mut lines = self.lines.lock();
        let handle = lines.get_mut(&line).ok_or(AppError::NotConfigured(line))?;
        if handle.listener.is_some() {
            return Err(AppError::platform(-EBUSY, format!("{irq} already requested")));
        }
        if handle.direction != Some(Direction::Input) {
            return Err(AppError::InvalidState(format!(
                "line {line} must be an input to request an interrupt"
            )));
        }

        handle.edge = Some(trigger);
        if let Err(e) = self.apply(line, handle) {
            handle.edge = None;
            return Err(e);
        }
        let request = handle.request(line)?.clone();
        handle.listener = Some(EdgeListener::new(irq, request, handler)?);
        Ok(())
    }

    fn unregister_interrupt(&self, irq: InterruptId) {
        let line = irq.0;
        let listener = {
            let mut lines = self.lines.lock();
            let Some(handle) = lines.get_mut(&line) else {
                warn!("trying to free already-free {irq}");
                return;
            };
            handle.edge = None;
            if let Err(e) = self.apply(line, handle) {
                warn!("failed to disable edge detection on line {line}: {e}");
            }
            handle.listener.take()
        };
        // joined outside the lock, the listener may be inside a handler
        match listener {
            Some(listener) => drop(listener),
            None => warn!("trying to free already-free {irq}"),
        }
    }

    fn release(&self, line: u32) {
        let handle = self.lines.lock().remove(&line);
        match handle {
            Some(mut handle) => {
                drop(handle.listener.take());
                drop(handle);
                debug!("line {line} returned to the kernel");
            }
            None => warn!("trying to free unclaimed line {line}"),
        }
    }
}
