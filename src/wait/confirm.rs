use crate::events::{MatchEvent, MotionEvent};
use crate::frame::Position;
use tracing::debug;

/// Counts matches found at the same position in consecutive frames
#[derive(Debug, Clone)]
pub struct MatchConfirmation {
    required: u32,
    count: u32,
    last: Position,
}

impl MatchConfirmation {
    pub fn new(required: u32) -> Self {
        Self {
            required,
            count: 0,
            last: Position::default(),
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Feed one frame's result; returns the position once confirmed.
    ///
    /// A match extends the streak only if it is the first of the streak or
    /// sits exactly where the previous frame's result was. Drift or a
    /// non-match starts over.
    pub fn observe(&mut self, event: &MatchEvent) -> Option<Position> {
        let position = event.position();
        debug!(
            "{} {} found at {} (last: {}) with dimensions {}x{}. 1st pass: {:.0}%. Timestamp: {}.",
            if event.matched { "Match" } else { "Weak match" },
            self.count,
            position,
            self.last,
            event.width,
            event.height,
            100.0 * event.confidence,
            event.timestamp
        );

        if event.matched && (self.count == 0 || position == self.last) {
            self.count += 1;
        } else {
            self.count = 0;
        }
        self.last = position;

        (self.count >= self.required).then_some(position)
    }

    /// Forget the streak, e.g. after frames were dropped
    pub fn reset(&mut self) {
        self.count = 0;
    }
}

/// Counts consecutive frames with motion
#[derive(Debug, Clone)]
pub struct MotionConfirmation {
    required: u32,
    count: u32,
}

impl MotionConfirmation {
    pub fn new(required: u32) -> Self {
        Self { required, count: 0 }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Feed one frame's result; true once enough frames in a row moved
    pub fn observe(&mut self, event: &MotionEvent) -> bool {
        if event.has_motion {
            self.count += 1;
            debug!("Motion detected. Timestamp: {}.", event.timestamp);
        } else {
            self.count = 0;
            debug!("No motion detected. Timestamp: {}.", event.timestamp);
        }
        self.count >= self.required
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn found(x: i32, y: i32) -> MatchEvent {
        MatchEvent {
            matched: true,
            x,
            y,
            width: 20,
            height: 10,
            confidence: 0.95,
            timestamp: 0,
        }
    }

    fn not_found() -> MatchEvent {
        MatchEvent {
            matched: false,
            ..found(0, 0)
        }
    }

    #[test]
    fn test_confirms_at_stable_position() {
        let mut confirm = MatchConfirmation::new(3);
        assert_eq!(confirm.observe(&found(1, 1)), None);
        assert_eq!(confirm.observe(&found(1, 1)), None);
        assert_eq!(confirm.observe(&found(1, 1)), Some(Position::new(1, 1)));
    }

    #[test]
    fn test_non_match_resets_streak() {
        let mut confirm = MatchConfirmation::new(3);
        let events = [found(1, 1), not_found(), found(1, 1), found(1, 1)];

        assert!(events.iter().all(|e| confirm.observe(e).is_none()));
        assert_eq!(confirm.count(), 2);
    }

    #[test]
    fn test_drift_resets_streak() {
        let mut confirm = MatchConfirmation::new(2);
        assert_eq!(confirm.observe(&found(1, 1)), None);
        // Moved: streak broken, and this frame doesn't start a new one
        assert_eq!(confirm.observe(&found(2, 2)), None);
        assert_eq!(confirm.count(), 0);
        assert_eq!(confirm.observe(&found(2, 2)), None);
        assert_eq!(confirm.observe(&found(2, 2)), Some(Position::new(2, 2)));
    }

    #[test]
    fn test_single_match_confirms_immediately() {
        let mut confirm = MatchConfirmation::new(1);
        assert_eq!(confirm.observe(&found(40, 50)), Some(Position::new(40, 50)));
    }

    #[test]
    fn test_motion_needs_consecutive_frames() {
        let mut confirm = MotionConfirmation::new(2);
        let motion = |has_motion| MotionEvent {
            has_motion,
            timestamp: 0,
        };

        assert!(!confirm.observe(&motion(true)));
        assert!(!confirm.observe(&motion(false)));
        assert!(!confirm.observe(&motion(true)));
        assert!(confirm.observe(&motion(true)));

        confirm.reset();
        assert_eq!(confirm.count(), 0);
    }
}
