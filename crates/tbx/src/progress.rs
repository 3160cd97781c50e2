//! 📊 Progress: a live bar while chunks go out, and a table when the run is over.
//!
//! 🧠 Knowledge graph:
//! - [`UploadProgress`]: indicatif bar over records, with a comfy-table message block
//!   (records/s over a 5 second window, chunk tallies, elapsed and remaining).
//! - [`run_summary`]: one row per pass and per upload, for the CLI to print at the end.
//!
//! When stderr is not a terminal indicatif draws nothing, so tests stay quiet. 🦆

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING, presets::UTF8_FULL};
use indicatif::{ProgressBar, ProgressStyle};

use crate::pipeline::RunReport;

fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

/// 🚚 Live progress for one upload call.
pub struct UploadProgress {
    label: String,
    total_records: u64,
    done_records: u64,
    ok_chunks: u64,
    failed_chunks: u64,
    bar: ProgressBar,
    samples: VecDeque<(Instant, u64)>,
    started: Instant,
}

impl std::fmt::Debug for UploadProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadProgress")
            .field("label", &self.label)
            .field("total_records", &self.total_records)
            .field("done_records", &self.done_records)
            .finish()
    }
}

impl UploadProgress {
    pub fn new(label: String, total_records: u64) -> Self {
        let bar = ProgressBar::new(total_records);
        if let Ok(style) = ProgressStyle::default_bar().template("{msg}\n| [{bar:40.cyan/blue}]") {
            bar.set_style(style.progress_chars("=>-"));
        }
        let started = Instant::now();
        Self {
            label,
            total_records,
            done_records: 0,
            ok_chunks: 0,
            failed_chunks: 0,
            bar,
            samples: VecDeque::from([(started, 0)]),
            started,
        }
    }

    /// ➕ One chunk is done, one way or the other.
    pub fn record_chunk(&mut self, records: u64, ok: bool) {
        self.done_records += records;
        if ok {
            self.ok_chunks += 1;
        } else {
            self.failed_chunks += 1;
        }
        let rate = self.records_per_sec();
        self.render(rate);
        self.bar.set_position(self.done_records);
    }

    pub fn finish(&self) {
        self.bar.finish();
    }

    /// 🏎️ Sliding five second window, so one slow chunk does not ruin the average forever.
    fn records_per_sec(&mut self) -> f64 {
        let now = Instant::now();
        let window = Duration::from_secs(5);
        while let Some(&(at, _)) = self.samples.front() {
            if now.duration_since(at) > window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
        self.samples.push_back((now, self.done_records));
        match self.samples.front() {
            Some(&(oldest_at, oldest_done)) => {
                let elapsed = now.duration_since(oldest_at).as_secs_f64();
                if elapsed > 0.0 {
                    self.done_records.saturating_sub(oldest_done) as f64 / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }

    fn render(&self, rate: f64) {
        let elapsed = self.started.elapsed();
        let remaining = if self.done_records > 0 && self.total_records > self.done_records {
            let per_record = elapsed.as_secs_f64() / self.done_records as f64;
            format_duration(Duration::from_secs_f64(
                per_record * (self.total_records - self.done_records) as f64,
            ))
        } else {
            "--:--".to_string()
        };

        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.add_row(vec![
            Cell::new(format!("{} records/s", format_number(rate as u64)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!(
                "{} / {} records",
                format_number(self.done_records),
                format_number(self.total_records)
            ))
            .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} chunks ok", self.ok_chunks)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{} chunks failed", self.failed_chunks))
                .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} elapsed", format_duration(elapsed)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{remaining} remaining")).set_alignment(CellAlignment::Right),
        ]);
        self.bar.set_message(format!("{}\n{table}", self.label));
    }
}

/// 🍽️ The end-of-run table: one row per transform pass, resolution and upload.
pub fn run_summary(report: &RunReport) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["step", "kind", "detail", "ok", "problems"]);

    for entry in &report.steps {
        table.add_row(vec![
            Cell::new(entry.step),
            Cell::new(&entry.kind),
            Cell::new(&entry.detail),
            Cell::new(format_number(entry.ok as u64)).set_alignment(CellAlignment::Right),
            Cell::new(format_number(entry.problems as u64)).set_alignment(CellAlignment::Right),
        ]);
    }
    table
}
