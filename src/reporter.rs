// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use indicatif::{ProgressBar, ProgressStyle};

// ============================================================================
// Reporter Trait
// ============================================================================

/// Session narrative and transfer progress, handed to the receiver FSM
pub trait Reporter: Send {
    fn info(&mut self, msg: &str);

    fn error(&mut self, msg: &str);

    fn begin_transfer(&mut self, _total_bytes: u64) {}

    fn advance(&mut self, _bytes: u64) {}

    fn end_transfer(&mut self) {}
}

// ============================================================================
// Console Reporter
// ============================================================================

const PB_STYLE: &str = "[{elapsed_precise}] [{bar:40}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

/// Logs through `tracing` and draws a byte progress bar on the terminal
#[derive(Default)]
pub struct ConsoleReporter {
    bar: Option<ProgressBar>,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Reporter for ConsoleReporter {
    fn info(&mut self, msg: &str) {
        match &self.bar {
            Some(bar) => bar.suspend(|| tracing::info!("{}", msg)),
            None => tracing::info!("{}", msg),
        }
    }

    fn error(&mut self, msg: &str) {
        match &self.bar {
            Some(bar) => bar.suspend(|| tracing::error!("{}", msg)),
            None => tracing::error!("{}", msg),
        }
    }

    fn begin_transfer(&mut self, total_bytes: u64) {
        let bar = ProgressBar::new(total_bytes);
        if let Ok(style) = ProgressStyle::with_template(PB_STYLE) {
            bar.set_style(style.progress_chars("=> "));
        }
        self.bar = Some(bar);
    }

    fn advance(&mut self, bytes: u64) {
        if let Some(bar) = &self.bar {
            bar.inc(bytes);
        }
    }

    fn end_transfer(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish();
        }
    }
}

// ============================================================================
// Recording Reporter for Testing
// ============================================================================

#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Info(String),
    Error(String),
    Begin(u64),
    Advance(u64),
    End,
}

/// Keeps every event in a shared log so tests can inspect it after the
/// FSM has consumed the reporter.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct RecordingReporter {
    events: std::sync::Arc<std::sync::Mutex<Vec<Event>>>,
}

#[cfg(test)]
impl RecordingReporter {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn progress(&self) -> u64 {
        self.events()
            .iter()
            .map(|e| match e {
                Event::Advance(n) => *n,
                _ => 0,
            })
            .sum()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Error(msg) => Some(msg),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
impl Reporter for RecordingReporter {
    fn info(&mut self, msg: &str) {
        self.push(Event::Info(msg.to_string()));
    }

    fn error(&mut self, msg: &str) {
        self.push(Event::Error(msg.to_string()));
    }

    fn begin_transfer(&mut self, total_bytes: u64) {
        self.push(Event::Begin(total_bytes));
    }

    fn advance(&mut self, bytes: u64) {
        self.push(Event::Advance(bytes));
    }

    fn end_transfer(&mut self) {
        self.push(Event::End);
    }
}
