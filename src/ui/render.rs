use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use textwrap::Options;

use crate::activity::ActivityEntry;
use crate::approval::PendingApproval;
use crate::connection::ConnectionStatus;
use crate::plan::{ExecutionPlan, TaskStatus};
use crate::protocol::LogLevel;
use crate::run::{Run, RunStatus};
use crate::ui::icons::{CHECK, CROSS, FILE_NEW, FOLDER, GATE, INFO, PLAN, RUNNING, WARN};
use crate::workspace::DeliverableFile;

const DEFAULT_WIDTH: usize = 100;
const MIN_WIDTH: usize = 40;
const TICK: Duration = Duration::from_millis(120);

/// Terminal renderer for a streamed run.
///
/// A spinner line at the bottom shows `Run | Phase | Status | Connection`;
/// activity entries are printed above it as wrapped line blocks. Debug-level
/// entries are only shown in verbose mode.
pub struct EventRenderer {
    status_bar: ProgressBar,
    attended: bool,
    verbose: bool,
    width: usize,
}

impl EventRenderer {
    pub fn new(verbose: bool) -> Self {
        let attended = console::user_attended();
        let status_bar = if attended {
            ProgressBar::new_spinner()
        } else {
            ProgressBar::hidden()
        };
        if let Ok(spinner) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            status_bar.set_style(spinner);
        }
        status_bar.enable_steady_tick(TICK);
        Self {
            status_bar,
            attended,
            verbose,
            width: terminal_width(),
        }
    }

    fn print_line(&self, line: impl AsRef<str>) {
        if self.status_bar.is_hidden() {
            println!("{}", line.as_ref());
        } else {
            self.status_bar.println(line.as_ref());
        }
    }

    pub fn update_status(&self, run: &Run, connection: &ConnectionStatus) {
        self.status_bar.set_message(status_line(run, connection));
    }

    pub fn show_entry(&self, entry: &ActivityEntry) {
        if entry.level == LogLevel::Debug && !self.verbose {
            return;
        }
        for line in wrap_entry(entry, self.width) {
            let styled = match entry.level {
                LogLevel::Debug => style(line).dim(),
                LogLevel::Info => style(line),
                LogLevel::Warn => style(line).yellow(),
                LogLevel::Error => style(line).red(),
            };
            self.print_line(styled.to_string());
        }
    }

    pub fn show_plan(&self, plan: &ExecutionPlan) {
        let (done, total) = plan.progress();
        self.print_line(format!(
            "{}{} ({}/{} tasks complete)",
            PLAN,
            style("Execution plan").bold(),
            done,
            total
        ));
        for task in &plan.tasks {
            let marker = match task.status {
                TaskStatus::Pending => style("[ ]").dim(),
                TaskStatus::InProgress => style("[>]").cyan(),
                TaskStatus::Completed => style("[x]").green(),
                TaskStatus::Failed => style("[!]").red(),
                TaskStatus::Blocked => style("[-]").yellow(),
            };
            let line = format!("{} {}", task.id, task.title);
            for (i, wrapped) in wrap(&line, self.width.saturating_sub(8), "", "  ")
                .into_iter()
                .enumerate()
            {
                if i == 0 {
                    self.print_line(format!("    {} {}", marker, wrapped));
                } else {
                    self.print_line(format!("        {}", wrapped));
                }
            }
        }
    }

    pub fn show_approval(&self, pending: &PendingApproval) {
        let phase = pending.phase.as_deref().unwrap_or("plan");
        self.print_line(format!(
            "{}{} for {}",
            GATE,
            style("Approval requested").bold().yellow(),
            style(phase).cyan()
        ));
        if let Some(prompt) = &pending.prompt {
            for line in wrap(prompt, self.width, "    ", "    ") {
                self.print_line(line);
            }
        }
    }

    pub fn note(&self, message: &str) {
        self.print_line(format!("{}{}", INFO, message));
    }

    pub fn show_deliverables(&self, files: &[DeliverableFile]) {
        if files.is_empty() {
            return;
        }
        self.print_line(format!(
            "{}{} ({})",
            FOLDER,
            style("Deliverables").bold(),
            files.len()
        ));
        for file in files {
            self.print_line(format!(
                "    {}{} {}",
                FILE_NEW,
                file.path,
                style(format!("{} bytes", file.size)).dim()
            ));
        }
    }

    /// Hide the spinner while an interactive prompt owns the terminal.
    pub fn pause(&self) {
        if self.attended {
            self.status_bar.disable_steady_tick();
            self.status_bar.set_draw_target(ProgressDrawTarget::hidden());
        }
    }

    pub fn resume(&self) {
        if self.attended {
            self.status_bar.set_draw_target(ProgressDrawTarget::stderr());
            self.status_bar.enable_steady_tick(TICK);
        }
    }

    /// Stop the spinner and print the final state of the run.
    pub fn finish(&self, run: &Run) {
        self.status_bar.finish_and_clear();
        let line = match run.status {
            RunStatus::Completed => format!("{}{}", CHECK, style("Run completed").green().bold()),
            RunStatus::Error => format!(
                "{}{} {}",
                CROSS,
                style("Run failed:").red().bold(),
                run.last_error.as_deref().unwrap_or("unknown error")
            ),
            RunStatus::Idle => format!("{}{}", WARN, style("Run ended without a result").yellow()),
            other => format!("{}Stopped watching ({})", RUNNING, other),
        };
        self.print_line(line);
    }
}

impl Drop for EventRenderer {
    fn drop(&mut self) {
        if !self.status_bar.is_finished() {
            self.status_bar.finish_and_clear();
        }
    }
}

fn terminal_width() -> usize {
    terminal_size::terminal_size()
        .map(|(terminal_size::Width(w), _)| w as usize)
        .unwrap_or(DEFAULT_WIDTH)
        .max(MIN_WIDTH)
}

/// `Run | Phase | Status | Connection`, unstyled.
pub fn status_line(run: &Run, connection: &ConnectionStatus) -> String {
    let connection = match connection {
        ConnectionStatus::Error(reason) => format!("error: {}", reason),
        other => other.label().to_string(),
    };
    format!(
        "Run {} | Phase {} | {} | {}",
        run.id.as_deref().map(short_id).unwrap_or("-"),
        run.phase.as_deref().unwrap_or("-"),
        run.status,
        connection
    )
}

fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((i, _)) => &id[..i],
        None => id,
    }
}

/// Plain lines for one entry: `HH:MM:SS LEVEL source  text`, wrapped to
/// `width` with continuation lines aligned under the text.
pub fn wrap_entry(entry: &ActivityEntry, width: usize) -> Vec<String> {
    let prefix = format!(
        "{} {:<5} {}  ",
        entry.timestamp.format("%H:%M:%S"),
        entry.level.as_str().to_ascii_uppercase(),
        entry.source
    );
    let indent = " ".repeat(9);
    let mut lines = Vec::new();
    for (i, paragraph) in entry.text.lines().enumerate() {
        let initial = if i == 0 { prefix.as_str() } else { indent.as_str() };
        lines.extend(wrap(paragraph, width, initial, &indent));
    }
    if lines.is_empty() {
        lines.push(prefix.trim_end().to_string());
    }
    lines
}

fn wrap(text: &str, width: usize, initial: &str, subsequent: &str) -> Vec<String> {
    let options = Options::new(width.max(MIN_WIDTH))
        .initial_indent(initial)
        .subsequent_indent(subsequent);
    textwrap::wrap(text, options)
        .into_iter()
        .map(|line| line.into_owned())
        .collect()
}
