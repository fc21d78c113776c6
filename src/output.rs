use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ProgressObserver, RunReport};
use crate::domain::ItemStatus;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

#[derive(Debug, Clone, Serialize)]
pub struct TilesResult {
    pub zones: Vec<String>,
}

/// Machine-readable output on stdout; progress goes to the tracing log on stderr.
pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &RunReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_tiles(result: &TilesResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressObserver for JsonOutput {
    fn on_item_listed(&self, display_id: &str) {
        tracing::debug!(display_id, "queued");
    }

    fn on_status_changed(&self, display_id: &str, status: ItemStatus) {
        tracing::info!(display_id, status = status.label(), "status");
    }

    fn on_bytes_progress(&self, display_id: &str, done: u64, total: Option<u64>) {
        tracing::trace!(display_id, done, total, "bytes");
    }

    fn on_diagnostic(&self, message: &str) {
        tracing::info!("{message}");
    }
}

/// Coloured plain-text summary printed once the terminal view has closed.
pub fn print_run_summary(report: &RunReport) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    let errors = report
        .items
        .iter()
        .filter(|item| item.status == ItemStatus::Error)
        .count();

    println!("{cyan}Landsat summary{reset}");
    println!("{cyan}Zones: {}{reset}", report.zones.join(", "));
    println!(
        "{cyan}Found: {}  after filtering: {}{reset}",
        report.found, report.filtered
    );
    println!("{green}Available locally: {}{reset}", report.downloaded.len());
    if errors > 0 {
        println!("{red}Errors: {errors}{reset}");
    } else {
        println!("{yellow}Errors: 0{reset}");
    }

    for item in &report.items {
        let color = match item.status {
            ItemStatus::Error => red,
            ItemStatus::InStorage => green,
            _ => cyan,
        };
        println!("{color}  {} ({}){reset}", item.display_id, item.status);
    }
}

pub fn print_tiles_text(result: &TilesResult) {
    for zone in &result.zones {
        println!("{zone}");
    }
}
