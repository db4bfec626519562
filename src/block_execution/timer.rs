/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::time::{Duration, Instant};

/// Named stopwatches used to measure how long parts of block execution take.
#[derive(Debug, Default)]
pub struct ExecutionTimer {
    timers: HashMap<String, Instant>,
}

impl ExecutionTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the timer `name`. Fails if it is already running.
    pub fn start_timer(&mut self, name: &str) -> Result<(), TimerError> {
        if self.timers.contains_key(name) {
            return Err(TimerError::AlreadyStarted {
                name: name.to_string(),
            });
        }
        self.timers.insert(name.to_string(), Instant::now());
        Ok(())
    }

    /// Stop the timer `name`, returning how long it ran. Fails if it was never started.
    pub fn stop_timer(&mut self, name: &str) -> Result<Duration, TimerError> {
        self.timers
            .remove(name)
            .map(|started| started.elapsed())
            .ok_or_else(|| TimerError::NotStarted {
                name: name.to_string(),
            })
    }

    /// How long the timer `name` has been running, without stopping it.
    pub fn elapsed(&self, name: &str) -> Result<Duration, TimerError> {
        self.timers
            .get(name)
            .map(|started| started.elapsed())
            .ok_or_else(|| TimerError::NotStarted {
                name: name.to_string(),
            })
    }

    pub fn is_started(&self, name: &str) -> bool {
        self.timers.contains_key(name)
    }

    /// Discard the timer `name` whether or not it is running.
    pub fn clear_timer(&mut self, name: &str) {
        self.timers.remove(name);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerError {
    AlreadyStarted { name: String },
    NotStarted { name: String },
}

impl Display for TimerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TimerError::AlreadyStarted { name } => write!(f, "timer {} is already started", name),
            TimerError::NotStarted { name } => write!(f, "timer {} is not started", name),
        }
    }
}

impl std::error::Error for TimerError {}
