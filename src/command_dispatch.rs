//! Purpose: Hold top-level CLI command dispatch for `recfile`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: `scan` starts exactly one scanner thread and `concurrency` consumers.
//! Invariants: Every consumer drains until its own sentinel, even after a write failure.

use std::thread::{self, JoinHandle};

use serde::Serialize;

use recfile::api::{
    Consumer, Entry, FileOptions, JsonFile, Record, ScanEnd, ScanReport, ScannerLoop,
};

use super::*;

#[derive(Serialize)]
struct Coordinates {
    offset: u64,
    length: u32,
}

#[derive(Serialize)]
struct ScanSummary<'a> {
    file: &'a str,
    records: u64,
    blank: u64,
    malformed: u64,
    sentinels: usize,
    end: &'static str,
    delivered: u64,
}

pub(super) fn dispatch_command(command: Command) -> Result<RunOutcome, Error> {
    match command {
        Command::Scan {
            file,
            concurrency,
            capacity,
        } => {
            let options = FileOptions::new()
                .concurrency(concurrency)
                .capacity(capacity);
            let file = JsonFile::open(&file, options)?;
            scan_file(&file)?;
            file.close()?;
            Ok(RunOutcome::ok())
        }
        Command::Get {
            file,
            offset,
            length,
        } => {
            let file = JsonFile::open(&file, FileOptions::new())?;
            let value = file.json_factory(offset, length).json()?;
            emit_json(&value)?;
            file.close()?;
            Ok(RunOutcome::ok())
        }
        Command::Append { file, data, create } => {
            let value: Value = serde_json::from_str(&data).map_err(|err| {
                Error::new(ErrorKind::Usage)
                    .with_message("record is not valid JSON")
                    .with_hint("Pass a single JSON object, e.g. '{\"event\":\"login\"}'.")
                    .with_source(err)
            })?;
            let file = JsonFile::open(&file, FileOptions::new().create(create))?;
            let handle = file.append_json(&value)?;
            let coordinates = Coordinates {
                offset: handle.offset(),
                length: handle.length(),
            };
            emit_json(&json!(coordinates))?;
            file.close()?;
            Ok(RunOutcome::ok())
        }
    }
}

fn scan_file(file: &JsonFile) -> Result<(), Error> {
    let scanner = file.scanner()?;
    let producer = spawn_scanner(scanner)?;

    let workers = (0..file.concurrency())
        .map(|index| spawn_consumer(index, file.consumer()))
        .collect::<Result<Vec<_>, Error>>()?;

    let mut delivered = 0u64;
    let mut first_error = None;
    for worker in workers {
        match join(worker)? {
            Ok(count) => delivered += count,
            Err(err) => {
                first_error.get_or_insert(err);
            }
        }
    }
    let report = join(producer)?;

    emit_summary(file, &report, delivered);
    match report.end {
        ScanEnd::Eof => {}
        ScanEnd::Failed(err) | ScanEnd::Interrupted(err) => return Err(err),
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn spawn_scanner(scanner: ScannerLoop) -> Result<JoinHandle<ScanReport>, Error> {
    thread::Builder::new()
        .name("recfile-scan".to_string())
        .spawn(move || scanner.run())
        .map_err(|err| Error::from_io(err).with_message("failed to start scanner thread"))
}

fn spawn_consumer(
    index: usize,
    consumer: Consumer,
) -> Result<JoinHandle<Result<u64, Error>>, Error> {
    thread::Builder::new()
        .name(format!("recfile-consume-{index}"))
        .spawn(move || consume(consumer))
        .map_err(|err| Error::from_io(err).with_message("failed to start consumer thread"))
}

/// Prints records until this consumer's sentinel arrives.
fn consume(consumer: Consumer) -> Result<u64, Error> {
    let mut printed = 0u64;
    let mut write_error = None;
    loop {
        let handle = match consumer.take()? {
            Entry::Sentinel => break,
            Entry::Record(handle) => handle,
        };
        if write_error.is_some() {
            continue;
        }
        let record = match handle.json() {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(
                    offset = handle.offset(),
                    error = %err,
                    "dropping unreadable record"
                );
                continue;
            }
        };
        let line = json!({
            "offset": handle.offset(),
            "length": handle.length(),
            "record": record,
        });
        match emit_json(&line) {
            Ok(()) => printed += 1,
            Err(err) => write_error = Some(err),
        }
    }
    match write_error {
        Some(err) => Err(err),
        None => Ok(printed),
    }
}

fn join<T>(handle: JoinHandle<T>) -> Result<T, Error> {
    handle.join().map_err(|_| {
        Error::new(ErrorKind::Internal).with_message("worker thread panicked")
    })
}

fn emit_summary(file: &JsonFile, report: &ScanReport, delivered: u64) {
    let name = file.name();
    let summary = ScanSummary {
        file: &name,
        records: report.records,
        blank: report.blank,
        malformed: report.malformed,
        sentinels: report.sentinels,
        end: match report.end {
            ScanEnd::Eof => "eof",
            ScanEnd::Failed(_) => "failed",
            ScanEnd::Interrupted(_) => "interrupted",
        },
        delivered,
    };
    let value = json!({ "scan": summary });
    match serde_json::to_string(&value) {
        Ok(json) => eprintln!("{json}"),
        Err(err) => tracing::error!(error = %err, "failed to encode scan summary"),
    }
}
