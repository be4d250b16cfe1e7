//! Per-stream sequence tracking for pubsub messages

use super::CryptoError;
use std::collections::BTreeSet;

/// Maximum number of out-of-order sequence numbers remembered
pub const SKIPPED_CAPACITY: usize = 32;

/// Gap entries recorded for a single jump ahead
const MAX_GAP_FILL: u64 = 16;

/// How a sequence number relates to the window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Exactly the expected number
    InOrder,
    /// Ahead of the expected number; the gap is remembered
    Ahead,
    /// Behind the expected number but previously skipped
    Late,
}

/// Replay window for one pubsub stream
///
/// Accepting is split into [`check`](Self::check) and
/// [`commit`](Self::commit) so that a message which later fails to decrypt
/// leaves the window untouched.
#[derive(Debug, Clone)]
pub struct ReplayWindow {
    stream: String,
    expected: u64,
    skipped: BTreeSet<u64>,
}

impl ReplayWindow {
    /// Create a window expecting `initial` next
    #[must_use]
    pub fn new(stream: impl Into<String>, initial: u64) -> Self {
        Self {
            stream: stream.into(),
            expected: initial,
            skipped: BTreeSet::new(),
        }
    }

    /// Stream this window tracks
    #[must_use]
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Next expected sequence number
    #[must_use]
    pub fn expected(&self) -> u64 {
        self.expected
    }

    /// Sequence numbers seen out of order, ascending
    pub fn skipped(&self) -> impl Iterator<Item = u64> + '_ {
        self.skipped.iter().copied()
    }

    /// Number of remembered gaps
    #[must_use]
    pub fn skipped_len(&self) -> usize {
        self.skipped.len()
    }

    /// Classify `sequence` without changing the window
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::ReplayRejected`] for a number below the
    /// expected counter that was never skipped
    pub fn check(&self, sequence: u64) -> Result<Admission, CryptoError> {
        if sequence == self.expected {
            Ok(Admission::InOrder)
        } else if sequence > self.expected {
            Ok(Admission::Ahead)
        } else if self.skipped.contains(&sequence) {
            Ok(Admission::Late)
        } else {
            Err(CryptoError::ReplayRejected {
                stream: self.stream.clone(),
                sequence,
                expected: self.expected,
            })
        }
    }

    /// Record `sequence` as received
    pub fn commit(&mut self, sequence: u64, admission: Admission) {
        match admission {
            Admission::InOrder => {
                self.expected = sequence.saturating_add(1);
            }
            Admission::Ahead => {
                let floor = sequence
                    .saturating_sub(MAX_GAP_FILL)
                    .max(self.expected);
                self.skipped.extend(floor..sequence);
                while self.skipped.len() > SKIPPED_CAPACITY {
                    self.skipped.pop_first();
                }
                self.expected = sequence.saturating_add(1);
            }
            Admission::Late => {
                self.skipped.remove(&sequence);
            }
        }
    }

    /// [`check`](Self::check) then [`commit`](Self::commit)
    ///
    /// # Errors
    ///
    /// Returns error if the sequence number is a replay
    pub fn accept(&mut self, sequence: u64) -> Result<Admission, CryptoError> {
        let admission = self.check(sequence)?;
        self.commit(sequence, admission);
        Ok(admission)
    }
}
