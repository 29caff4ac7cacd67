// Single-pass producer: reads lines, wraps records in handles, and fans them out.
use crate::core::error::Error;
use crate::core::handle::{EagerHandle, Record, RecordHandle};
use crate::core::handoff::{Entry, Producer};
use crate::core::store::{IndexedLine, LineReader};

const SNIPPET_CHARS: usize = 80;

/// Sequential line supplier for a scan pass.
pub trait LineSource {
    fn read_next_line(&mut self) -> Result<Option<IndexedLine>, Error>;

    /// Identity used in log lines.
    fn name(&self) -> String;
}

impl LineSource for LineReader {
    fn read_next_line(&mut self) -> Result<Option<IndexedLine>, Error> {
        LineReader::read_next_line(self)
    }

    fn name(&self) -> String {
        self.store().name()
    }
}

#[derive(Debug)]
pub enum ScanEnd {
    Eof,
    Failed(Error),
    Interrupted(Error),
}

#[derive(Debug)]
pub struct ScanReport {
    pub records: u64,
    pub blank: u64,
    pub malformed: u64,
    pub sentinels: usize,
    pub end: ScanEnd,
}

impl ScanReport {
    pub fn is_clean(&self) -> bool {
        matches!(self.end, ScanEnd::Eof) && self.malformed == 0
    }
}

#[derive(Debug)]
pub struct ScannerLoop<S = LineReader> {
    source: S,
    producer: Producer,
    concurrency: usize,
}

impl<S: LineSource> ScannerLoop<S> {
    pub fn new(source: S, producer: Producer, concurrency: usize) -> Self {
        Self {
            source,
            producer,
            concurrency,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runs the pass to completion and enqueues one sentinel per consumer.
    ///
    /// Consumes the loop; a scan is never restarted. Malformed lines are
    /// logged and skipped. A read failure ends the scan but sentinels are
    /// still drained, so consumers always terminate.
    pub fn run(mut self) -> ScanReport {
        let name = self.source.name();
        let mut report = ScanReport {
            records: 0,
            blank: 0,
            malformed: 0,
            sentinels: 0,
            end: ScanEnd::Eof,
        };

        let end = self.scan(&name, &mut report);
        report.end = end;
        match &report.end {
            ScanEnd::Eof => {}
            ScanEnd::Failed(err) => {
                tracing::error!(file = %name, error = %err, "record scan failed");
            }
            ScanEnd::Interrupted(err) => {
                tracing::warn!(file = %name, error = %err, "record scan interrupted");
            }
        }

        if !matches!(report.end, ScanEnd::Interrupted(_)) {
            self.drain_sentinels(&name, &mut report);
        }

        tracing::debug!(
            file = %name,
            records = report.records,
            blank = report.blank,
            malformed = report.malformed,
            sentinels = report.sentinels,
            "record scan finished"
        );
        report
    }

    /// One sentinel per consumer, blocking on a full queue like any record.
    fn drain_sentinels(&self, name: &str, report: &mut ScanReport) {
        for _ in 0..self.concurrency {
            if let Err(err) = self.producer.put(Entry::Sentinel) {
                tracing::warn!(file = %name, error = %err, "sentinel drain interrupted");
                report.end = ScanEnd::Interrupted(err);
                return;
            }
            report.sentinels += 1;
        }
    }

    fn scan(&mut self, name: &str, report: &mut ScanReport) -> ScanEnd {
        loop {
            let line = match self.source.read_next_line() {
                Ok(Some(line)) => line,
                Ok(None) => return ScanEnd::Eof,
                Err(err) => return ScanEnd::Failed(err),
            };
            if line.is_blank() {
                report.blank += 1;
                continue;
            }

            let offset = line.offset;
            let handle = match EagerHandle::from_line(line) {
                Ok(handle) => handle,
                Err(err) => {
                    report.malformed += 1;
                    tracing::warn!(
                        file = %name,
                        offset,
                        error = %err,
                        "skipping malformed record"
                    );
                    continue;
                }
            };
            if let Err(err) = handle.parse() {
                report.malformed += 1;
                let snippet = snippet(&handle);
                tracing::warn!(
                    file = %name,
                    offset,
                    line = %snippet,
                    error = %err,
                    "skipping malformed record"
                );
                continue;
            }

            if let Err(err) = self.producer.put(Entry::Record(RecordHandle::Eager(handle))) {
                return ScanEnd::Interrupted(err);
            }
            report.records += 1;
        }
    }
}

fn snippet(handle: &EagerHandle) -> String {
    match handle.text() {
        Ok(text) => text.chars().take(SNIPPET_CHARS).collect(),
        Err(_) => "<invalid utf-8>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{LineSource, ScanEnd, ScannerLoop};
    use crate::core::error::{Error, ErrorKind};
    use crate::core::handle::Record;
    use crate::core::handoff::{Entry, HandoffQueue};
    use crate::core::store::IndexedLine;
    use serde_json::json;
    use std::collections::VecDeque;

    /// Serves canned lines, then fails if asked to.
    struct ScriptedSource {
        lines: VecDeque<IndexedLine>,
        fail_at_end: bool,
    }

    impl ScriptedSource {
        fn new(lines: &[&str], fail_at_end: bool) -> Self {
            let mut offset = 0;
            let lines = lines
                .iter()
                .map(|text| {
                    let line = IndexedLine {
                        bytes: text.as_bytes().to_vec(),
                        offset,
                    };
                    offset += text.len() as u64 + 1;
                    line
                })
                .collect();
            Self { lines, fail_at_end }
        }
    }

    impl LineSource for ScriptedSource {
        fn read_next_line(&mut self) -> Result<Option<IndexedLine>, Error> {
            match self.lines.pop_front() {
                Some(line) => Ok(Some(line)),
                None if self.fail_at_end => {
                    Err(Error::new(ErrorKind::Io).with_message("device unreadable"))
                }
                None => Ok(None),
            }
        }

        fn name(&self) -> String {
            "scripted".to_string()
        }
    }

    fn drain(queue: &HandoffQueue) -> Vec<Entry> {
        let mut entries = Vec::new();
        while !queue.is_empty() {
            entries.push(queue.take().expect("take"));
        }
        entries
    }

    #[test]
    fn malformed_and_blank_lines_are_skipped() {
        let queue = HandoffQueue::bounded(16).expect("queue");
        let lines = [r#"{"a":1}"#, "NOT-JSON", "", "  ", r#"{"b":2}"#];
        let source = ScriptedSource::new(&lines, false);
        let scanner = ScannerLoop::new(source, queue.producer().expect("producer"), 3);

        let report = scanner.run();
        assert!(matches!(report.end, ScanEnd::Eof));
        assert_eq!(report.records, 2);
        assert_eq!(report.malformed, 1);
        assert_eq!(report.blank, 2);
        assert_eq!(report.sentinels, 3);
        assert!(!report.is_clean());

        let entries = drain(&queue);
        assert_eq!(entries.len(), 5);
        let first = entries[0].as_record().expect("record");
        assert_eq!(first.json().expect("json"), json!({"a": 1}));
        assert_eq!(first.offset(), 0);
        let second = entries[1].as_record().expect("record");
        assert_eq!(second.json().expect("json"), json!({"b": 2}));
        assert_eq!(second.offset(), 21);
        assert!(entries[2..].iter().all(Entry::is_sentinel));
    }

    #[test]
    fn fatal_read_error_still_drains_sentinels() {
        let queue = HandoffQueue::bounded(16).expect("queue");
        let source = ScriptedSource::new(&[r#"{"a":1}"#], true);
        let report = ScannerLoop::new(source, queue.producer().expect("producer"), 4).run();

        match &report.end {
            ScanEnd::Failed(err) => assert_eq!(err.kind(), ErrorKind::Io),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(report.records, 1);
        assert_eq!(report.sentinels, 4);

        let entries = drain(&queue);
        assert_eq!(entries.len(), 5);
        assert!(!entries[0].is_sentinel());
        assert_eq!(entries.iter().filter(|entry| entry.is_sentinel()).count(), 4);
    }

    #[test]
    fn sentinels_wait_for_room_in_a_full_queue() {
        let queue = HandoffQueue::bounded(1).expect("queue");
        let source = ScriptedSource::new(&[r#"{"a":1}"#], false);
        let scanner = ScannerLoop::new(source, queue.producer().expect("producer"), 3);
        let producer = std::thread::spawn(move || scanner.run());

        assert!(!queue.take().expect("record").is_sentinel());
        for _ in 0..3 {
            assert!(queue.take().expect("sentinel").is_sentinel());
        }
        let report = producer.join().expect("join");
        assert!(report.is_clean());
        assert_eq!(report.sentinels, 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn missing_consumers_interrupt_the_scan() {
        let queue = HandoffQueue::bounded(1).expect("queue");
        let producer = queue.producer().expect("producer");
        drop(queue);

        let source = ScriptedSource::new(&[r#"{"a":1}"#, r#"{"b":2}"#], false);
        let report = ScannerLoop::new(source, producer, 2).run();
        assert!(matches!(report.end, ScanEnd::Interrupted(_)));
        assert_eq!(report.records, 0);
        assert_eq!(report.sentinels, 0);
    }
}
