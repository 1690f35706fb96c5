use std::io::IsTerminal;

use comfy_table::{Attribute, Cell, Color, Table, presets::NOTHING};
use deltaship_core::transfer::JobState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct CliTableTheme {
    pub use_color: bool,
}

impl CliTableTheme {
    pub(crate) fn detect() -> Self {
        resolve_table_theme(
            std::io::stdout().is_terminal(),
            std::env::var_os("NO_COLOR").is_some(),
        )
    }

    pub(crate) fn new_data_table(self, headers: &[&str]) -> Table {
        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_header(headers.iter().map(|h| self.bold(h)).collect::<Vec<_>>());
        table
    }

    pub(crate) fn new_kv_table(self) -> Table {
        let mut table = Table::new();
        table.load_preset(NOTHING);
        table
    }

    fn bold(self, text: &str) -> Cell {
        let cell = Cell::new(text);
        if self.use_color {
            cell.add_attribute(Attribute::Bold)
        } else {
            cell
        }
    }

    /// Diff status ("added", "changed", ...) or job state, colored when enabled.
    pub(crate) fn status_cell(self, status: &str) -> Cell {
        let cell = Cell::new(status);
        if !self.use_color {
            return cell;
        }
        match status {
            "added" | "done" => cell.fg(Color::Green),
            "changed" | "skipped" => cell.fg(Color::Yellow),
            "failed" | "removed" => cell.fg(Color::Red),
            _ => cell,
        }
    }
}

fn resolve_table_theme(is_tty: bool, no_color: bool) -> CliTableTheme {
    CliTableTheme {
        use_color: is_tty && !no_color,
    }
}

pub(crate) fn add_kv_row(table: &mut Table, theme: CliTableTheme, field: &str, value: impl ToString) {
    table.add_row(vec![theme.bold(field), Cell::new(value.to_string())]);
}

pub(crate) fn job_status(state: JobState, skipped: bool) -> &'static str {
    match state {
        JobState::Done if skipped => "skipped",
        JobState::Done => "done",
        JobState::Failed => "failed",
        _ => "pending",
    }
}

#[cfg(test)]
mod tests {
    use comfy_table::presets::NOTHING;

    use super::*;

    #[test]
    fn color_only_on_tty_without_no_color() {
        assert!(resolve_table_theme(true, false).use_color);
        assert!(!resolve_table_theme(true, true).use_color);
        assert!(!resolve_table_theme(false, false).use_color);
    }

    #[test]
    fn data_table_uses_nothing_preset() {
        let theme = resolve_table_theme(false, false);
        let mut table = theme.new_data_table(&["Status", "Path"]);
        assert_eq!(table.current_style_as_preset(), NOTHING);
    }

    #[test]
    fn job_status_labels() {
        assert_eq!(job_status(JobState::Done, true), "skipped");
        assert_eq!(job_status(JobState::Done, false), "done");
        assert_eq!(job_status(JobState::Failed, false), "failed");
        assert_eq!(job_status(JobState::Retrying, false), "pending");
    }
}
