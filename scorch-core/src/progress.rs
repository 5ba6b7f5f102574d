//! Progress events and the sink they are delivered to.

use std::time::SystemTime;

/// One instantaneous progress sample. No averaging or smoothing is applied;
/// each event reflects cumulative progress at the moment it was emitted.
#[derive(Debug, Clone, Copy)]
pub struct ProgressEvent {
    pub timestamp: SystemTime,
    /// Completion percentage, clamped to `[0, 100]`.
    pub percent: f64,
    pub written_bytes: u64,
    pub total_bytes: u64,
}

/// Receives progress events from a running write operation.
pub trait ProgressSink {
    fn progress(&mut self, event: ProgressEvent);
}

/// Lets front-ends pass a plain closure as the sink.
impl<F: FnMut(ProgressEvent)> ProgressSink for F {
    fn progress(&mut self, event: ProgressEvent) {
        self(event)
    }
}

/// Derives a monotonic completion percentage and publishes it to a sink.
pub struct ProgressReporter<'a, S: ?Sized> {
    sink: &'a mut S,
    last_percent: f64,
}

impl<'a, S: ProgressSink + ?Sized> ProgressReporter<'a, S> {
    pub fn new(sink: &'a mut S) -> Self {
        Self {
            sink,
            last_percent: 0.0,
        }
    }

    /// The 0% emission sent before the first write.
    pub fn begin(&mut self, total_bytes: u64) {
        self.emit(0, total_bytes);
    }

    /// One emission per loop iteration.
    pub fn update(&mut self, written_bytes: u64, total_bytes: u64) {
        self.emit(written_bytes, total_bytes);
    }

    fn emit(&mut self, written_bytes: u64, total_bytes: u64) {
        let raw = if total_bytes == 0 {
            0.0
        } else {
            written_bytes as f64 / total_bytes as f64 * 100.0
        };
        let percent = raw.clamp(0.0, 100.0).max(self.last_percent);
        self.last_percent = percent;
        self.sink.progress(ProgressEvent {
            timestamp: SystemTime::now(),
            percent,
            written_bytes,
            total_bytes,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        events: Vec<ProgressEvent>,
    }

    impl ProgressSink for RecordingSink {
        fn progress(&mut self, event: ProgressEvent) {
            self.events.push(event);
        }
    }

    #[test]
    fn begin_emits_zero_percent() {
        let mut sink = RecordingSink::default();
        ProgressReporter::new(&mut sink).begin(1000);

        assert_eq!(sink.events.len(), 1);
        assert_eq!(sink.events[0].percent, 0.0);
        assert_eq!(sink.events[0].written_bytes, 0);
        assert_eq!(sink.events[0].total_bytes, 1000);
    }

    #[test]
    fn percent_tracks_written_bytes() {
        let mut sink = RecordingSink::default();
        let mut reporter = ProgressReporter::new(&mut sink);
        reporter.begin(200);
        reporter.update(50, 200);
        reporter.update(200, 200);

        let percents: Vec<f64> = sink.events.iter().map(|e| e.percent).collect();
        assert_eq!(percents, vec![0.0, 25.0, 100.0]);
    }

    #[test]
    fn percent_is_clamped_and_monotonic() {
        let mut sink = RecordingSink::default();
        let mut reporter = ProgressReporter::new(&mut sink);
        reporter.update(300, 200);
        reporter.update(100, 200);

        let percents: Vec<f64> = sink.events.iter().map(|e| e.percent).collect();
        assert_eq!(percents, vec![100.0, 100.0]);
    }

    #[test]
    fn zero_total_reports_zero_percent() {
        let mut sink = RecordingSink::default();
        ProgressReporter::new(&mut sink).update(10, 0);

        assert_eq!(sink.events[0].percent, 0.0);
    }

    #[test]
    fn closures_are_sinks() {
        let mut seen = 0u32;
        {
            let mut sink = |_event: ProgressEvent| seen += 1;
            let mut reporter = ProgressReporter::new(&mut sink);
            reporter.begin(10);
            reporter.update(10, 10);
        }
        assert_eq!(seen, 2);
    }
}
