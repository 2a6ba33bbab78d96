//! Boundary-crossing event detector.
//!
//! A horizontal virtual line at `line_position` (pixel Y) splits the frame.
//! Each track keeps a short history of centroid-Y samples; a crossing is an
//! exact sign change of `y - line` between the previous sample and the current
//! one. Crossings map to entry/exit by the configured entry direction and are
//! debounced so one track alternates entry/exit and never repeats a kind.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use crate::tracker::Track;

pub const DEFAULT_HISTORY_LEN: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Entry,
    Exit,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Entry => f.write_str("entry"),
            EventKind::Exit => f.write_str("exit"),
        }
    }
}

/// Image-space direction that counts as entering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryDirection {
    #[default]
    Down,
    Up,
}

impl FromStr for EntryDirection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "down" => Ok(EntryDirection::Down),
            "up" => Ok(EntryDirection::Up),
            other => Err(anyhow!("entry direction must be 'down' or 'up', got '{}'", other)),
        }
    }
}

impl fmt::Display for EntryDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryDirection::Down => f.write_str("down"),
            EntryDirection::Up => f.write_str("up"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CrossingEvent {
    pub track_id: u64,
    pub kind: EventKind,
    /// Seconds since the Unix epoch.
    pub timestamp_s: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Crossing {
    Downward,
    Upward,
}

#[derive(Debug)]
struct TrackHistory {
    samples: VecDeque<f32>,
    last_event: Option<EventKind>,
}

impl TrackHistory {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            last_event: None,
        }
    }

    fn push(&mut self, y: f32, capacity: usize) {
        while self.samples.len() >= capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(y);
    }
}

pub struct EventDetector {
    line_position: f32,
    entry_direction: EntryDirection,
    history_len: usize,
    history: HashMap<u64, TrackHistory>,
}

impl EventDetector {
    pub fn new(line_position: f32, entry_direction: EntryDirection) -> Self {
        Self::with_history_len(line_position, entry_direction, DEFAULT_HISTORY_LEN)
    }

    /// `history_len` is clamped to at least 1 sample.
    pub fn with_history_len(
        line_position: f32,
        entry_direction: EntryDirection,
        history_len: usize,
    ) -> Self {
        log::info!(
            "event detector: line y={} entry direction={}",
            line_position,
            entry_direction
        );
        Self {
            line_position,
            entry_direction,
            history_len: history_len.max(1),
            history: HashMap::new(),
        }
    }

    /// Moves the line. Existing per-track history is kept.
    pub fn configure(&mut self, line_position: f32, entry_direction: EntryDirection) {
        log::info!(
            "event detector reconfigured: line y={} entry direction={}",
            line_position,
            entry_direction
        );
        self.line_position = line_position;
        self.entry_direction = entry_direction;
    }

    pub fn line_position(&self) -> f32 {
        self.line_position
    }

    pub fn entry_direction(&self) -> EntryDirection {
        self.entry_direction
    }

    /// Number of track ids with recorded history.
    pub fn tracked_ids(&self) -> usize {
        self.history.len()
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }

    fn crossing(&self, prev_y: f32, y: f32) -> Option<Crossing> {
        let line = self.line_position;
        if prev_y < line && line <= y {
            Some(Crossing::Downward)
        } else if prev_y > line && line >= y {
            Some(Crossing::Upward)
        } else {
            None
        }
    }

    fn kind_for(&self, crossing: Crossing) -> EventKind {
        match (crossing, self.entry_direction) {
            (Crossing::Downward, EntryDirection::Down) | (Crossing::Upward, EntryDirection::Up) => {
                EventKind::Entry
            }
            _ => EventKind::Exit,
        }
    }

    pub fn detect(&mut self, tracks: &[Track], timestamp_s: u64) -> Vec<CrossingEvent> {
        let mut events = Vec::new();
        let capacity = self.history_len;

        for track in tracks {
            let y = track.bbox.centroid_y();

            let Some(prev_y) = self
                .history
                .get(&track.id)
                .and_then(|h| h.samples.back().copied())
            else {
                let mut seeded = TrackHistory::new(capacity);
                seeded.push(y, capacity);
                self.history.insert(track.id, seeded);
                continue;
            };

            let kind = self.crossing(prev_y, y).map(|c| self.kind_for(c));
            let Some(entry) = self.history.get_mut(&track.id) else {
                continue;
            };

            if let Some(kind) = kind {
                if entry.last_event == Some(kind) {
                    log::debug!("track {}: repeated {} crossing suppressed", track.id, kind);
                } else {
                    log::info!(
                        "track {}: {} (y {:.1} -> {:.1}, line {})",
                        track.id,
                        kind,
                        prev_y,
                        y,
                        self.line_position
                    );
                    entry.last_event = Some(kind);
                    events.push(CrossingEvent {
                        track_id: track.id,
                        kind,
                        timestamp_s,
                    });
                }
            }

            entry.push(y, capacity);
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BBox;

    fn track_at(id: u64, cy: f32) -> Track {
        Track {
            id,
            bbox: BBox::ltrb(100.0, cy - 40.0, 200.0, cy + 40.0),
            hits: 5,
            hit_streak: 5,
            age: 5,
            time_since_update: 0,
        }
    }

    fn run(detector: &mut EventDetector, id: u64, ys: &[f32]) -> Vec<(usize, EventKind)> {
        let mut out = Vec::new();
        for (frame, y) in ys.iter().enumerate() {
            for ev in detector.detect(&[track_at(id, *y)], frame as u64) {
                out.push((frame, ev.kind));
            }
        }
        out
    }

    #[test]
    fn downward_crossing_is_entry_on_the_reaching_frame() {
        let mut detector = EventDetector::new(400.0, EntryDirection::Down);
        let events = run(&mut detector, 1, &[390.0, 395.0, 400.0, 405.0, 410.0]);
        assert_eq!(events, vec![(2, EventKind::Entry)]);
    }

    #[test]
    fn upward_crossing_maps_by_direction() {
        let mut down = EventDetector::new(400.0, EntryDirection::Down);
        assert_eq!(run(&mut down, 1, &[420.0, 380.0]), vec![(1, EventKind::Exit)]);

        let mut up = EventDetector::new(400.0, EntryDirection::Up);
        assert_eq!(run(&mut up, 1, &[420.0, 380.0]), vec![(1, EventKind::Entry)]);
        assert_eq!(run(&mut up, 2, &[380.0, 420.0]), vec![(1, EventKind::Exit)]);
    }

    #[test]
    fn single_sample_never_triggers() {
        let mut detector = EventDetector::new(400.0, EntryDirection::Down);
        assert!(detector.detect(&[track_at(7, 400.0)], 0).is_empty());
        assert_eq!(detector.tracked_ids(), 1);
    }

    #[test]
    fn back_and_forth_alternates_kinds() {
        let mut detector = EventDetector::new(400.0, EntryDirection::Down);
        let ys = [390.0, 410.0, 390.0, 410.0, 390.0, 410.0];
        let events = run(&mut detector, 3, &ys);
        let kinds: Vec<EventKind> = events.iter().map(|(_, k)| *k).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Entry,
                EventKind::Exit,
                EventKind::Entry,
                EventKind::Exit,
                EventKind::Entry
            ]
        );
        for pair in kinds.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
    }

    #[test]
    fn repeated_same_direction_crossing_is_suppressed() {
        let mut detector = EventDetector::new(400.0, EntryDirection::Down);
        let events = run(&mut detector, 4, &[390.0, 410.0]);
        assert_eq!(events.len(), 1);
        // Move the line under the track so the next downward step crosses it
        // again without any upward crossing in between.
        detector.configure(420.0, EntryDirection::Down);
        let again = detector.detect(&[track_at(4, 430.0)], 9);
        assert!(again.is_empty());
    }

    #[test]
    fn history_is_bounded_and_reset_clears() {
        let mut detector = EventDetector::with_history_len(400.0, EntryDirection::Down, 3);
        for (i, y) in [10.0, 20.0, 30.0, 40.0, 50.0].iter().enumerate() {
            detector.detect(&[track_at(1, *y)], i as u64);
        }
        assert_eq!(detector.history[&1].samples.len(), 3);
        assert_eq!(detector.history[&1].samples.front().copied(), Some(30.0));
        detector.reset();
        assert_eq!(detector.tracked_ids(), 0);
    }

    #[test]
    fn parses_entry_direction() {
        assert_eq!("DOWN".parse::<EntryDirection>().unwrap(), EntryDirection::Down);
        assert_eq!(" up ".parse::<EntryDirection>().unwrap(), EntryDirection::Up);
        assert!("left".parse::<EntryDirection>().is_err());
    }
}
