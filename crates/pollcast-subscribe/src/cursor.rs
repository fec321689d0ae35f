//! Timetoken cursor: where the next long-poll resumes.
//!
//! The cursor only moves forward. Going back to zero is an explicit
//! [`TimetokenCursor::reset`], used when the registry empties and the next
//! subscribe must start from scratch.

use chrono::{DateTime, Utc};
use thiserror::Error;

use pollcast_core::Timetoken;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CursorError {
    #[error("non-monotonic cursor: current={current}, attempted={attempted}")]
    NonMonotonic { current: u64, attempted: u64 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimetokenCursor {
    current: Timetoken,
    /// Wall-clock time of the last forward move.
    advanced_at: Option<DateTime<Utc>>,
}

impl TimetokenCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Timetoken {
        self.current
    }

    pub fn is_zero(&self) -> bool {
        self.current.is_zero()
    }

    pub fn advanced_at(&self) -> Option<DateTime<Utc>> {
        self.advanced_at
    }

    /// Move to `next`. Equal values are accepted and keep the old region.
    pub fn advance(&mut self, next: Timetoken, now: DateTime<Utc>) -> Result<(), CursorError> {
        if next < self.current {
            return Err(CursorError::NonMonotonic {
                current: self.current.value,
                attempted: next.value,
            });
        }
        if next > self.current {
            self.current = next;
            self.advanced_at = Some(now);
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.current = Timetoken::ZERO;
        self.advanced_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn starts_at_zero() {
        let cursor = TimetokenCursor::new();
        assert!(cursor.is_zero());
        assert_eq!(cursor.advanced_at(), None);
    }

    #[test]
    fn advance_moves_forward_and_stamps() {
        let mut cursor = TimetokenCursor::new();
        let now = Utc::now();
        cursor.advance(Timetoken::new(10, 1), now).unwrap();
        assert_eq!(cursor.current(), Timetoken::new(10, 1));
        assert_eq!(cursor.advanced_at(), Some(now));
    }

    #[test]
    fn equal_value_is_a_no_op() {
        let mut cursor = TimetokenCursor::new();
        let first = Utc::now();
        cursor.advance(Timetoken::new(10, 1), first).unwrap();
        cursor
            .advance(Timetoken::new(10, 7), first + chrono::Duration::seconds(5))
            .unwrap();
        assert_eq!(cursor.current().region, 1);
        assert_eq!(cursor.advanced_at(), Some(first));
    }

    #[test]
    fn backwards_is_refused() {
        let mut cursor = TimetokenCursor::new();
        cursor.advance(Timetoken::new(10, 0), Utc::now()).unwrap();
        let err = cursor.advance(Timetoken::new(9, 0), Utc::now()).unwrap_err();
        assert_eq!(
            err,
            CursorError::NonMonotonic {
                current: 10,
                attempted: 9
            }
        );
        assert_eq!(cursor.current().value, 10);
    }

    #[test]
    fn reset_returns_to_zero() {
        let mut cursor = TimetokenCursor::new();
        cursor.advance(Timetoken::new(10, 0), Utc::now()).unwrap();
        cursor.reset();
        assert!(cursor.is_zero());
        assert_eq!(cursor.advanced_at(), None);
    }

    proptest! {
        #[test]
        fn never_moves_backwards(steps in proptest::collection::vec(0u64..1_000, 1..50)) {
            let mut cursor = TimetokenCursor::new();
            let mut high = 0u64;
            for value in steps {
                let result = cursor.advance(Timetoken::new(value, 0), Utc::now());
                prop_assert_eq!(result.is_ok(), value >= high);
                high = high.max(value);
                prop_assert_eq!(cursor.current().value, high);
            }
        }
    }
}
