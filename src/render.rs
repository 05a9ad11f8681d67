//! Text report for the `ps` listing.
//!
//! One header, then one line per selected task:
//!
//! ```text
//! name              Idle        Pid   Task       ID   Info      Request
//! ---------------------------------------------------------------------
//! sim                  3 R     4242   000          0                sweeping 25%
//!    solver         2:05 W     4242   001         17        step 3  queued
//! ```
//!
//! The whole line takes the color of its strongest highlight.

use crate::config::RegistryConfig;
use crate::query::QueryRow;
use crate::task_record::{TaskRecord, TaskState};
use chrono::{DateTime, Utc};
use colored::{ColoredString, Colorize};
use std::io::{self, Write};

pub const HEADER: &str = "name              Idle        Pid   Task       ID   Info      Request";
pub const RULE: &str = "---------------------------------------------------------------------";

const INDENT: &str = "   ";
const NAME_WIDTH: usize = 16;

/// Row highlight, weakest first. When several apply the strongest wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Highlight {
    None,
    Progress,
    Suspended,
    Terminated,
    Queued,
    GrepMatch,
}

impl Highlight {
    fn paint(self, line: &str) -> ColoredString {
        match self {
            Highlight::None => line.normal(),
            Highlight::Progress => line.green(),
            Highlight::Suspended => line.cyan(),
            Highlight::Terminated => line.magenta(),
            Highlight::Queued => line.yellow(),
            Highlight::GrepMatch => line.red().bold(),
        }
    }
}

/// Which state characters count as suspended or terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePalette {
    pub suspended: Vec<char>,
    pub terminated: Vec<char>,
}

impl Default for StatePalette {
    fn default() -> Self {
        Self::from_config(&RegistryConfig::default())
    }
}

impl StatePalette {
    pub fn from_config(config: &RegistryConfig) -> Self {
        Self {
            suspended: config.suspended_states.clone(),
            terminated: config.terminated_states.clone(),
        }
    }

    pub fn is_suspended(&self, state: TaskState) -> bool {
        self.suspended.contains(&state.as_char())
    }

    pub fn is_terminated(&self, state: TaskState) -> bool {
        self.terminated.contains(&state.as_char())
    }
}

pub fn highlight_for(record: &TaskRecord, grep_match: bool, palette: &StatePalette) -> Highlight {
    let mut highlight = Highlight::None;
    if record.progress_active() {
        highlight = Highlight::Progress;
    }
    if palette.is_suspended(record.state) {
        highlight = Highlight::Suspended;
    }
    if palette.is_terminated(record.state) {
        highlight = Highlight::Terminated;
    }
    if record.status_text.contains("queued") {
        highlight = Highlight::Queued;
    }
    if grep_match {
        highlight = Highlight::GrepMatch;
    }
    highlight
}

/// Idle column: plain seconds under a minute, `M:SS` under an hour, `HhMM`
/// under a day, then whole days.
pub fn format_idle(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let days = seconds / 86_400;
    let hours = seconds / 3_600 % 24;
    let minutes = seconds / 60 % 60;
    let secs = seconds % 60;

    match (days, hours, minutes) {
        (1, _, _) => format!("{days:>3}day"),
        (d, _, _) if d > 1 => format!("{days:>2}days"),
        (_, h, m) if h > 0 => format!("{h:>3}h{m:02}"),
        (_, _, m) if m > 0 => format!("{m:>3}:{secs:02}"),
        _ => format!("{secs:>6}"),
    }
}

/// Trailing percentage, only while progress is active.
pub fn format_progress(record: &TaskRecord) -> Option<String> {
    let percent = record.progress_percent()?;
    if percent.fract() == 0.0 {
        Some(format!("{percent:.0}%"))
    } else {
        Some(format!("{percent:.1}%"))
    }
}

#[derive(Debug, Clone)]
pub struct StatusRenderer {
    palette: StatePalette,
    color: bool,
    now: DateTime<Utc>,
}

impl Default for StatusRenderer {
    fn default() -> Self {
        Self::new(StatePalette::default())
    }
}

impl StatusRenderer {
    pub fn new(palette: StatePalette) -> Self {
        Self {
            palette,
            color: true,
            now: Utc::now(),
        }
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    /// Reference time for the idle column.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn header_lines(&self) -> [String; 2] {
        if self.color {
            [HEADER.bold().to_string(), RULE.bold().to_string()]
        } else {
            [HEADER.to_string(), RULE.to_string()]
        }
    }

    /// A row without color.
    pub fn format_row(&self, row: &QueryRow<'_>) -> String {
        let record = row.record;
        let mut line = INDENT.repeat(record.depth as usize);
        line.push_str(record.display_name());

        let used = line.chars().count();
        if used < NAME_WIDTH {
            line.push_str(&" ".repeat(NAME_WIDTH - used));
        }

        line.push_str(&format_idle(record.idle_seconds(self.now)));
        line.push_str(&format!(
            " {}{:>9}   {:03}{:>11}{:>14}  {}",
            record.state, record.pid, row.ordinal, record.task_id, record.message, record.status_text
        ));

        if let Some(progress) = format_progress(record) {
            line.push(' ');
            line.push_str(&progress);
        }
        line
    }

    pub fn render<W: Write>(&self, out: &mut W, rows: &[QueryRow<'_>]) -> io::Result<()> {
        for line in self.header_lines() {
            writeln!(out, "{line}")?;
        }
        for row in rows {
            let line = self.format_row(row);
            if self.color {
                let highlight = highlight_for(row.record, row.grep_match, &self.palette);
                writeln!(out, "{}", highlight.paint(&line))?;
            } else {
                writeln!(out, "{line}")?;
            }
        }
        Ok(())
    }

    pub fn render_to_string(&self, rows: &[QueryRow<'_>]) -> String {
        let mut buffer = Vec::new();
        // writing into a Vec cannot fail
        let _ = self.render(&mut buffer, rows);
        String::from_utf8_lossy(&buffer).into_owned()
    }
}
