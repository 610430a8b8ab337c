//! Text rendering of dedupe reports. Results go to stdout, progress and
//! warnings to stderr.

use std::io::IsTerminal;
use std::time::{Duration, Instant};

use graph_dedupe::dedupe::{ConfirmedGroup, RunSummary, TypeReport, TypeStatus, UndeterminedGroup};
use indicatif::{ProgressBar, ProgressStyle};
use nu_ansi_term::{Color, Style};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

pub struct Ui {
    paint: bool,
    quiet: bool,
}

impl Ui {
    pub fn new(color: ColorMode, quiet: bool) -> Self {
        let paint = match color {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => std::io::stdout().is_terminal(),
        };
        #[cfg(windows)]
        if paint {
            let _ = nu_ansi_term::enable_ansi_support();
        }
        Self { paint, quiet }
    }

    pub fn run_summary(&self, summary: &RunSummary) {
        for report in &summary.types {
            self.type_report(report, summary.auto_fix);
            println!();
        }
        let totals = &summary.totals;
        self.heading("Totals", Style::new().bold());
        self.counts(&[
            ("types", summary.types.len()),
            ("failed", summary.failed_types),
            ("groups found", totals.groups_pass2),
            ("confirmed", totals.confirmed),
            ("deleted", totals.deleted),
            ("undetermined", totals.undetermined),
        ]);
        if summary.has_failures() {
            self.warn(&format!("{} entity type(s) failed", summary.failed_types));
        } else if summary.auto_fix {
            self.note(
                Color::Green,
                &format!("Removed {} duplicate vertices", totals.deleted),
            );
        } else {
            self.note(
                Color::Cyan,
                "Dry run: rerun with --auto-fix to delete confirmed duplicates",
            );
        }
    }

    fn type_report(&self, report: &TypeReport, auto_fix: bool) {
        let (status, color) = match &report.status {
            TypeStatus::Completed => ("completed".to_string(), Color::Green),
            TypeStatus::CapExceeded => ("cap exceeded, nothing deleted".to_string(), Color::Yellow),
            TypeStatus::Failed(message) => (format!("failed: {message}"), Color::Red),
        };
        self.heading(
            &format!("{} ({status})", report.entity_type),
            color.bold(),
        );
        let counts = &report.counts;
        self.counts(&[
            ("matched", counts.vertices_matched),
            ("outside window", counts.vertices_outside_window),
            ("unreadable", counts.vertices_unreadable),
            ("groups pass 1", counts.groups_pass1),
            ("groups pass 2", counts.groups_pass2),
            ("confirmed", counts.confirmed),
            ("deleted", counts.deleted),
        ]);
        if !report.plan.is_empty() {
            self.subheading(if auto_fix { "Confirmed" } else { "Would delete" });
            for group in &report.plan {
                println!("    {}", self.plan_line(group));
            }
        }
        if !report.undetermined.is_empty() {
            self.subheading("Undetermined (resolve manually)");
            for group in &report.undetermined {
                self.undetermined_group(group);
            }
        }
    }

    pub fn entity_types<I>(&self, lines: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.heading("Entity types", Style::new().bold());
        for line in lines {
            println!("  {line}");
        }
    }

    pub fn warn(&self, message: &str) {
        if self.paint && !self.quiet {
            eprintln!("{}", Color::Yellow.bold().paint(message));
        } else {
            eprintln!("{message}");
        }
    }

    /// Spinner on stderr while the scheduler runs; hidden with `--quiet`.
    pub fn scanning(&self, label: String) -> ScanProgress {
        let bar = (!self.quiet).then(|| {
            let bar = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} [{elapsed}]") {
                bar.set_style(style);
            }
            bar.set_message(label);
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        });
        ScanProgress {
            bar,
            start: Instant::now(),
        }
    }

    fn plan_line(&self, group: &ConfirmedGroup) -> String {
        let doomed: Vec<String> = group.doomed().map(|id| id.to_string()).collect();
        let keep = format!("keep {}", group.keeper);
        let remove = format!("remove [{}]", doomed.join(", "));
        if self.paint {
            format!("{} {}", Color::Green.paint(keep), Color::Red.paint(remove))
        } else {
            format!("{keep} {remove}")
        }
    }

    fn undetermined_group(&self, group: &UndeterminedGroup) {
        let reason = group.reason.to_string();
        if self.paint {
            println!("    {}", Color::Yellow.paint(reason));
        } else {
            println!("    {reason}");
        }
        for member in &group.members {
            println!(
                "      {} {} keys={} uri={} neighbors={}",
                member.id,
                member.display_name.as_deref().unwrap_or("-"),
                member.key_signature.as_deref().unwrap_or("?"),
                member.canonical_uri.as_deref().unwrap_or("-"),
                member.neighbor_count
            );
        }
    }

    fn counts(&self, rows: &[(&str, usize)]) {
        let width = rows.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
        for (label, value) in rows {
            if self.paint {
                println!("  {} {value}", Style::new().dimmed().paint(format!("{label:>width$}:")));
            } else {
                println!("  {label:>width$}: {value}");
            }
        }
    }

    fn heading(&self, title: &str, style: Style) {
        if self.paint {
            println!("{}", style.paint(title));
        } else {
            println!("{title}");
        }
    }

    fn subheading(&self, title: &str) {
        if self.paint {
            println!("  {}", Style::new().underline().paint(title));
        } else {
            println!("  {title}");
        }
    }

    fn note(&self, color: Color, message: &str) {
        if self.paint {
            println!("{}", color.paint(message));
        } else {
            println!("{message}");
        }
    }
}

pub struct ScanProgress {
    bar: Option<ProgressBar>,
    start: Instant,
}

impl ScanProgress {
    pub fn finish(mut self) -> Duration {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
        self.start.elapsed()
    }
}

impl Drop for ScanProgress {
    fn drop(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.abandon_with_message("scan interrupted");
        }
    }
}
