//! Trellis profile log
//!
//! Keeps the `capacity` most expensive timing entries seen during a run and
//! flushes them to a sink once, in descending order of ticks.
//!
//! Profiling state is never process-wide: a [`ProfileContext`] is created by
//! whoever wants instrumentation and handed to the code paths that record.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::time::Instant;

/// A single retained profile entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileEntry {
    /// Cost of the recorded event; higher ranks first
    pub ticks: i64,
    /// Line written to the sink on dump
    pub message: String,
}

/// Capacity-bounded log ordered by descending `ticks`
///
/// Once full, a new entry only gets in if it beats the current minimum,
/// unless it is forced, in which case the minimum is evicted regardless.
#[derive(Debug)]
pub struct ProfileLog {
    capacity: usize,
    entries: VecDeque<ProfileEntry>,
}

impl ProfileLog {
    /// Create an empty log retaining at most `capacity` entries
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Maximum number of retained entries
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of retained entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is retained
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Smallest retained tick count
    #[must_use]
    pub fn min_ticks(&self) -> Option<i64> {
        self.entries.back().map(|e| e.ticks)
    }

    /// Retained entries, most expensive first
    pub fn entries(&self) -> impl Iterator<Item = &ProfileEntry> + '_ {
        self.entries.iter()
    }

    /// Insert a timestamped entry
    ///
    /// Returns whether the entry was retained.
    pub fn add_log(&mut self, ticks: i64, message: impl Into<String>, force: bool) -> bool {
        if self.capacity == 0 {
            return false;
        }

        if self.entries.len() == self.capacity {
            let min = self.min_ticks().unwrap_or(i64::MIN);
            if ticks <= min && !force {
                return false;
            }
            self.entries.pop_back();
        }

        // Equal ticks keep arrival order.
        let at = self
            .entries
            .iter()
            .position(|e| ticks > e.ticks)
            .unwrap_or(self.entries.len());
        self.entries.insert(
            at,
            ProfileEntry {
                ticks,
                message: message.into(),
            },
        );
        true
    }

    /// Write every retained message, one per line, and consume the log
    ///
    /// Returns the number of lines written.
    ///
    /// # Errors
    /// Propagates the first write error from `sink`.
    pub fn dump<W: Write>(self, sink: &mut W) -> io::Result<usize> {
        let mut written = 0;
        for entry in &self.entries {
            writeln!(sink, "{}", entry.message)?;
            written += 1;
        }
        sink.flush()?;
        Ok(written)
    }
}

/// Profiling context passed explicitly to instrumented code
///
/// Safe to share between concurrently running test cases.
#[derive(Debug)]
pub struct ProfileContext {
    log: Mutex<ProfileLog>,
}

impl ProfileContext {
    /// Create a context retaining at most `capacity` entries
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            log: Mutex::new(ProfileLog::new(capacity)),
        }
    }

    /// Record an entry, see [`ProfileLog::add_log`]
    pub fn record(&self, ticks: i64, message: impl Into<String>, force: bool) -> bool {
        let accepted = self.log.lock().add_log(ticks, message, force);
        if !accepted {
            tracing::trace!(ticks, "profile entry below retention threshold");
        }
        accepted
    }

    /// Start timing a labelled region
    #[must_use]
    pub fn span(&self, label: impl Into<String>) -> ProfileSpan<'_> {
        ProfileSpan {
            context: self,
            label: label.into(),
            started: Instant::now(),
        }
    }

    /// Number of retained entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.log.lock().len()
    }

    /// True when nothing is retained
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log.lock().is_empty()
    }

    /// Flush the retained entries to `sink`, consuming the context
    ///
    /// # Errors
    /// Propagates write errors from `sink`.
    pub fn finish<W: Write>(self, sink: &mut W) -> io::Result<usize> {
        self.log.into_inner().dump(sink)
    }
}

/// Timed region created by [`ProfileContext::span`]
#[derive(Debug)]
pub struct ProfileSpan<'a> {
    context: &'a ProfileContext,
    label: String,
    started: Instant,
}

impl ProfileSpan<'_> {
    /// Stop timing and record `"<micros> us <label>"`
    pub fn finish(self, force: bool) -> bool {
        let ticks = i64::try_from(self.started.elapsed().as_micros()).unwrap_or(i64::MAX);
        let message = format!("{ticks} us {}", self.label);
        self.context.record(ticks, message, force)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ticks(log: &ProfileLog) -> Vec<i64> {
        log.entries().map(|e| e.ticks).collect()
    }

    #[test]
    fn test_retains_top_entries_in_descending_order() {
        let mut log = ProfileLog::new(2);

        assert!(log.add_log(10, "10 entry", false));
        assert!(log.add_log(30, "30 entry", false));
        assert!(log.add_log(20, "20 entry", false));

        assert_eq!(ticks(&log), vec![30, 20]);
    }

    #[test]
    fn test_rejects_below_minimum_unless_forced() {
        let mut log = ProfileLog::new(2);
        log.add_log(10, "10 entry", false);
        log.add_log(30, "30 entry", false);
        log.add_log(20, "20 entry", false);

        assert!(!log.add_log(5, "5 entry", false));
        assert_eq!(ticks(&log), vec![30, 20]);
        assert_eq!(log.min_ticks(), Some(20));

        assert!(log.add_log(5, "5 entry", true));
        assert_eq!(ticks(&log), vec![30, 5]);
        assert_eq!(log.min_ticks(), Some(5));
    }

    #[test]
    fn test_dump_writes_descending_and_consumes() {
        let mut log = ProfileLog::new(2);
        log.add_log(10, "10 entry", false);
        log.add_log(30, "30 entry", false);
        log.add_log(20, "20 entry", false);
        log.add_log(5, "5 entry", true);

        let mut sink = Vec::new();
        let written = log.dump(&mut sink).unwrap();

        assert_eq!(written, 2);
        assert_eq!(String::from_utf8(sink).unwrap(), "30 entry\n5 entry\n");
    }

    #[test]
    fn test_equal_ticks_at_capacity_are_rejected() {
        let mut log = ProfileLog::new(1);
        log.add_log(7, "first", false);

        assert!(!log.add_log(7, "second", false));
        assert_eq!(log.entries().next().unwrap().message, "first");
    }

    #[test]
    fn test_equal_ticks_keep_arrival_order() {
        let mut log = ProfileLog::new(3);
        log.add_log(7, "a", false);
        log.add_log(7, "b", false);

        let messages: Vec<_> = log.entries().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["a", "b"]);
    }

    #[test]
    fn test_zero_capacity_rejects_everything() {
        let mut log = ProfileLog::new(0);
        assert!(!log.add_log(100, "x", true));
        assert!(log.is_empty());
        assert_eq!(log.min_ticks(), None);
    }

    #[test]
    fn test_context_span_records_entry() {
        let context = ProfileContext::new(4);
        let span = context.span("build");
        assert!(span.finish(false));
        assert_eq!(context.len(), 1);

        let mut sink = Vec::new();
        context.finish(&mut sink).unwrap();
        let text = String::from_utf8(sink).unwrap();
        assert!(text.trim_end().ends_with("us build"));
    }
}
