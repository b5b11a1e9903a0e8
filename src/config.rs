use std::collections::{BTreeMap, HashSet};
use std::{fs, path::Path, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const DEFAULT_CHIP: &str = "/dev/gpiochip0";
pub const DEFAULT_DEBOUNCE_MS: u64 = 200;
pub const DEFAULT_NOTIFY_QUEUE_CAPACITY: usize = 16;

fn default_chip() -> String {
    DEFAULT_CHIP.to_string()
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_notify_queue_capacity() -> usize {
    DEFAULT_NOTIFY_QUEUE_CAPACITY
}

fn default_notify_env() -> BTreeMap<String, String> {
    BTreeMap::from([("HOME".to_string(), "/".to_string())])
}

/// External executable launched, without waiting, on a LED transition.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct NotifyCommand {
    pub path: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_notify_env")]
    pub env: BTreeMap<String, String>,
}

impl NotifyCommand {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
            env: default_notify_env(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub name: String,
    pub output_pin: u32,
    pub on_pin: u32,
    pub off_pin: u32,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default)]
    pub on_notify: Option<NotifyCommand>,
    #[serde(default)]
    pub off_notify: Option<NotifyCommand>,
}

impl ControllerConfig {
    pub fn new(name: impl Into<String>, output_pin: u32, on_pin: u32, off_pin: u32) -> Self {
        Self {
            name: name.into(),
            output_pin,
            on_pin,
            off_pin,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            on_notify: None,
            off_notify: None,
        }
    }

    pub fn lines(&self) -> [u32; 3] {
        [self.output_pin, self.on_pin, self.off_pin]
    }

    pub fn has_notifications(&self) -> bool {
        self.on_notify.is_some() || self.off_notify.is_some()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_chip")]
    pub chip: String,
    #[serde(default = "default_notify_queue_capacity")]
    pub notify_queue_capacity: usize,
    pub controllers: Vec<ControllerConfig>,
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, AppError> {
        let config: Self = serde_json::from_str(contents)
            .map_err(|e| AppError::Config(format!("Invalid config json: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.controllers.is_empty() {
            return Err(AppError::Config("no controllers configured".into()));
        }
        if self.notify_queue_capacity == 0 {
            return Err(AppError::Config(
                "notify_queue_capacity must be greater than zero".into(),
            ));
        }

        let mut names = HashSet::new();
        let mut lines = HashSet::new();
        for ctl in &self.controllers {
            if !names.insert(ctl.name.as_str()) {
                return Err(AppError::Config(format!(
                    "duplicate controller name {}",
                    ctl.name
                )));
            }
            for line in ctl.lines() {
                if !lines.insert(line) {
                    return Err(AppError::Config(format!(
                        "line {line} of controller {} is already in use",
                        ctl.name
                    )));
                }
            }
        }
        Ok(())
    }
}
