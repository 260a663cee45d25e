use std::{
    error::Error,
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::Parser;
use clap_derive::Parser;
use jiff::{Timestamp, civil::DateTime, tz::TimeZone};
use tracing::{Level, debug, error, info, span, warn};
use tracing_subscriber::EnvFilter;

use streamer_ingest::{
    clock,
    ids::{self, StreamerKey},
    ingest::{DeviceSnapshot, IngestOutcome, IngestStateMachine, ReportContext},
    report::{DEFAULT_MAX_REPORT_LENGTH, parser::ReportParser},
};

/// Prints what is inside streamer report files
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Report file, or a directory of `*.bin` reports whose
    /// `--`-separated name has the received time as 4th part
    path: PathBuf,
    /// Print every reading
    #[arg(short, long)]
    verbose: bool,
    /// Print only problems
    #[arg(short, long)]
    error_only: bool,
    /// When the gateway received the report, defaults to now
    #[arg(short, long)]
    received: Option<Timestamp>,
    #[arg(long, default_value_t = DEFAULT_MAX_REPORT_LENGTH)]
    max_length: usize,
}

#[derive(Debug, Default)]
struct Tally {
    files: usize,
    failed: usize,
    warnings: usize,
}

fn parse_received(s: &str) -> Option<Timestamp> {
    if let Ok(ts) = s.parse::<Timestamp>() {
        return Some(ts);
    }
    let dt: DateTime = s.parse().ok()?;
    dt.to_zoned(TimeZone::UTC).ok().map(|z| z.timestamp())
}

fn received_from_name(path: &Path) -> Option<Timestamp> {
    let stem = path.file_stem()?.to_str()?;
    parse_received(stem.split("--").nth(3)?)
}

fn inspect(path: &Path, received: Timestamp, args: &Args, tally: &mut Tally) -> Result<(), Box<dyn Error>> {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let span = span!(Level::INFO, "Report", file = %name);
    let _enter = span.enter();
    tally.files += 1;

    let data = fs::read(path)?;
    let report = match ReportParser::new(args.max_length).parse(&data) {
        Ok(report) => report,
        Err(e) => {
            error!("{e}");
            tally.failed += 1;
            return Ok(());
        }
    };

    let header = &report.header;
    let nominal = clock::base_time(received, header.sent_timestamp)?;
    info!(
        "device {} streamer {} selector {}",
        ids::device_slug(header.device_id),
        StreamerKey::new(header.device_id, header.streamer_index),
        report.selector()
    );
    info!("sent timestamp {}s, base time {nominal}", header.sent_timestamp);
    info!(
        "range {}..={}, length {}, {} reading(s)",
        report.footer.lowest_id,
        report.footer.highest_id,
        header.length(),
        report.readings.len()
    );
    if !report.integrity.is_verified() {
        warn!("integrity {:?}", report.integrity);
        tally.warnings += 1;
    }
    if report.chopped {
        tally.warnings += 1;
    }

    let ctx = ReportContext {
        received,
        now: Timestamp::now(),
    };
    match IngestStateMachine::default().evaluate(&report, &ctx, &DeviceSnapshot::default()) {
        IngestOutcome::Failed(_) => tally.failed += 1,
        IngestOutcome::AwaitingSibling(pending) => {
            debug!("would wait on {} sibling(s)", pending.waiting_on.len())
        }
        IngestOutcome::Ready(plan) | IngestOutcome::RebootDetected(plan) => {
            tally.warnings += plan.anomalies.len();
            for boundary in &plan.boundaries {
                warn!(
                    "reboot before reading {} (marker={}, clock_reset={})",
                    boundary.id, boundary.marker, boundary.clock_reset
                );
            }
            if args.verbose {
                for timed in &plan.readings {
                    let reading = &timed.reading;
                    info!(
                        "ID{} - {:#06x}: {} ({}s{}) => {}",
                        reading.id,
                        reading.stream,
                        timed.timestamp,
                        reading.timestamp,
                        if timed.dirty { ", dirty" } else { "" },
                        reading.value
                    );
                }
            }
        }
    }
    Ok(())
}

fn main() -> Result<ExitCode, Box<dyn Error>> {
    let args = Args::parse();
    let default_filter = if args.error_only { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let mut tally = Tally::default();
    if args.path.is_dir() {
        info!("processing all bin files in {}", args.path.display());
        let mut files: Vec<_> = fs::read_dir(&args.path)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "bin"))
            .collect();
        files.sort();

        for file in files {
            let Some(received) = received_from_name(&file).or(args.received) else {
                warn!("no received time in `{}`, skipping", file.display());
                continue;
            };
            if let Err(e) = inspect(&file, received, &args, &mut tally) {
                error!("{}: {e}", file.display());
                tally.failed += 1;
            }
        }
    } else {
        let received = args.received.unwrap_or_else(Timestamp::now);
        inspect(&args.path, received, &args, &mut tally)?;
    }

    info!(
        "{} file(s), {} failed, {} warning(s)",
        tally.files, tally.failed, tally.warnings
    );
    Ok(if tally.failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
