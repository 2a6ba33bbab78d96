//! Multi-object tracker.
//!
//! Identities are maintained by greedy global IoU matching between the boxes
//! tracks held on the previous frame and the current detections. There is no
//! motion model: a track's box is simply replaced by its matched detection.
//!
//! Lifecycle: Tentative (`hits < min_hits`) -> Confirmed -> pruned once
//! `time_since_update > max_age`. Pruning emits nothing; a pruned track just
//! stops appearing in `update()` output and its id is never handed out again.

use serde::Serialize;

use crate::detect::{BBox, Detection};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackerConfig {
    /// Frames a track survives without a match.
    pub max_age: u32,
    /// Matches needed before a track is reported.
    pub min_hits: u32,
    /// Minimum IoU for a track/detection pair to be matched.
    pub iou_threshold: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_age: 30,
            min_hits: 3,
            iou_threshold: 0.3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackState {
    Tentative,
    Confirmed,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Track {
    pub id: u64,
    pub bbox: BBox,
    pub hits: u32,
    pub hit_streak: u32,
    pub age: u32,
    pub time_since_update: u32,
}

impl Track {
    fn new(id: u64, bbox: BBox) -> Self {
        Self {
            id,
            bbox,
            hits: 1,
            hit_streak: 1,
            age: 0,
            time_since_update: 0,
        }
    }

    fn mark_matched(&mut self, bbox: BBox) {
        self.bbox = bbox;
        self.hits += 1;
        self.hit_streak += 1;
        self.time_since_update = 0;
    }

    fn mark_missed(&mut self) {
        // age and time_since_update were already advanced for this frame
        self.hit_streak = 0;
    }

    pub fn state(&self, min_hits: u32) -> TrackState {
        if self.hits >= min_hits {
            TrackState::Confirmed
        } else {
            TrackState::Tentative
        }
    }
}

pub struct Tracker {
    config: TrackerConfig,
    tracks: Vec<Track>,
    next_id: u64,
    frame_count: u64,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 1,
            frame_count: 0,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Frames seen since construction or the last reset.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Every live track, tentative ones included.
    pub fn live_tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Drops all tracks and restarts ids at 1.
    pub fn reset(&mut self) {
        self.tracks.clear();
        self.next_id = 1;
        self.frame_count = 0;
    }

    /// Advances one frame and returns the tracks that should be reported.
    pub fn update(&mut self, detections: &[Detection]) -> Vec<Track> {
        self.frame_count += 1;

        for track in &mut self.tracks {
            track.age += 1;
            track.time_since_update += 1;
        }

        let (matches, unmatched_tracks, unmatched_dets) = self.associate(detections);

        for (t_idx, d_idx) in matches {
            self.tracks[t_idx].mark_matched(detections[d_idx].bbox);
        }
        for t_idx in unmatched_tracks {
            self.tracks[t_idx].mark_missed();
        }
        for d_idx in unmatched_dets {
            let track = Track::new(self.next_id, detections[d_idx].bbox);
            self.next_id += 1;
            self.tracks.push(track);
        }

        let max_age = self.config.max_age;
        self.tracks.retain(|track| track.time_since_update <= max_age);

        let min_hits = self.config.min_hits;
        let bootstrapping = self.frame_count <= u64::from(min_hits);
        let out: Vec<Track> = self
            .tracks
            .iter()
            .filter(|track| {
                track.hits >= min_hits || (track.time_since_update == 0 && bootstrapping)
            })
            .cloned()
            .collect();

        log::debug!(
            "tracker frame {}: {} detections, {} live tracks, {} reported",
            self.frame_count,
            detections.len(),
            self.tracks.len(),
            out.len()
        );
        out
    }

    /// Greedy global matching: repeatedly commit the highest-IoU pair whose
    /// track and detection are both still free, until the best remaining IoU
    /// drops under the threshold. Ties go to the lower track id, then the
    /// lower detection index.
    fn associate(&self, detections: &[Detection]) -> (Vec<(usize, usize)>, Vec<usize>, Vec<usize>) {
        let mut candidates = Vec::new();
        for (t_idx, track) in self.tracks.iter().enumerate() {
            for (d_idx, det) in detections.iter().enumerate() {
                let iou = track.bbox.iou(&det.bbox);
                if iou >= self.config.iou_threshold {
                    candidates.push((iou, track.id, t_idx, d_idx));
                }
            }
        }
        candidates.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| a.1.cmp(&b.1))
                .then_with(|| a.3.cmp(&b.3))
        });

        let mut track_taken = vec![false; self.tracks.len()];
        let mut det_taken = vec![false; detections.len()];
        let mut matches = Vec::new();
        for (_, _, t_idx, d_idx) in candidates {
            if track_taken[t_idx] || det_taken[d_idx] {
                continue;
            }
            track_taken[t_idx] = true;
            det_taken[d_idx] = true;
            matches.push((t_idx, d_idx));
        }

        let unmatched_tracks = (0..self.tracks.len()).filter(|&i| !track_taken[i]).collect();
        let unmatched_dets = (0..detections.len()).filter(|&i| !det_taken[i]).collect();
        (matches, unmatched_tracks, unmatched_dets)
    }
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn car(x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
        Detection::new([x1, y1, x2, y2], 0.9, "car")
    }

    #[test]
    fn smooth_motion_keeps_one_id() {
        let mut tracker = Tracker::default();
        let mut seen = Vec::new();
        for frame in 1..=10 {
            let x1 = 100.0 + frame as f32 * 10.0;
            let tracks = tracker.update(&[car(x1, 200.0, x1 + 100.0, 280.0)]);
            assert_eq!(tracks.len(), 1, "frame {}", frame);
            seen.push(tracks[0].id);
        }
        assert!(seen.iter().all(|&id| id == 1));
    }

    #[test]
    fn tentative_tracks_hidden_after_bootstrap() {
        let mut tracker = Tracker::default();
        let anchor = car(100.0, 100.0, 200.0, 200.0);
        for _ in 0..5 {
            tracker.update(&[anchor.clone()]);
        }
        // A newcomer after the warm-up window has hits=1 < min_hits.
        let tracks = tracker.update(&[anchor.clone(), car(400.0, 100.0, 500.0, 200.0)]);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].id, 1);
        assert_eq!(tracker.live_tracks().len(), 2);
        assert_eq!(tracker.live_tracks()[1].state(3), TrackState::Tentative);

        tracker.update(&[anchor.clone(), car(402.0, 100.0, 502.0, 200.0)]);
        let tracks = tracker.update(&[anchor, car(404.0, 100.0, 504.0, 200.0)]);
        assert_eq!(tracks.iter().map(|t| t.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn bootstrap_frames_report_fresh_tracks() {
        let mut tracker = Tracker::default();
        let tracks = tracker.update(&[car(0.0, 0.0, 10.0, 10.0)]);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].hits, 1);
    }

    #[test]
    fn occluded_track_survives_within_max_age() {
        let mut tracker = Tracker::default();
        for _ in 0..5 {
            tracker.update(&[car(100.0, 200.0, 200.0, 280.0)]);
        }
        for _ in 0..5 {
            let tracks = tracker.update(&[]);
            assert_eq!(tracks.len(), 1);
            assert_eq!(tracks[0].hit_streak, 0);
        }
        let tracks = tracker.update(&[car(105.0, 205.0, 205.0, 285.0)]);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].id, 1);
        assert_eq!(tracks[0].time_since_update, 0);
        assert_eq!(tracks[0].age, 10);
        assert_eq!(tracks[0].hits, 6);
    }

    #[test]
    fn pruned_track_never_reappears() {
        let mut tracker = Tracker::new(TrackerConfig {
            max_age: 2,
            ..TrackerConfig::default()
        });
        for _ in 0..4 {
            tracker.update(&[car(100.0, 100.0, 200.0, 200.0)]);
        }
        for _ in 0..3 {
            tracker.update(&[]);
        }
        assert!(tracker.live_tracks().is_empty());
        tracker.update(&[car(100.0, 100.0, 200.0, 200.0)]);
        assert_eq!(tracker.live_tracks()[0].id, 2);
    }

    #[test]
    fn greedy_matching_prefers_highest_overlap() {
        let mut tracker = Tracker::new(TrackerConfig {
            min_hits: 1,
            ..TrackerConfig::default()
        });
        tracker.update(&[car(0.0, 0.0, 100.0, 100.0), car(60.0, 0.0, 160.0, 100.0)]);
        // Detection order is swapped; ids must follow the geometry.
        let tracks = tracker.update(&[car(62.0, 0.0, 162.0, 100.0), car(2.0, 0.0, 102.0, 100.0)]);
        let first = tracks.iter().find(|t| t.id == 1).unwrap();
        let second = tracks.iter().find(|t| t.id == 2).unwrap();
        assert_eq!(first.bbox.left(), 2.0);
        assert_eq!(second.bbox.left(), 62.0);
    }

    #[test]
    fn ties_go_to_lowest_track_id() {
        let mut tracker = Tracker::new(TrackerConfig {
            min_hits: 1,
            ..TrackerConfig::default()
        });
        tracker.update(&[car(0.0, 0.0, 100.0, 100.0), car(0.0, 0.0, 100.0, 100.0)]);
        let tracks = tracker.update(&[car(0.0, 0.0, 100.0, 100.0)]);
        let matched: Vec<u64> = tracks
            .iter()
            .filter(|t| t.time_since_update == 0)
            .map(|t| t.id)
            .collect();
        assert_eq!(matched, vec![1]);
    }

    #[test]
    fn reset_restarts_ids() {
        let mut tracker = Tracker::default();
        tracker.update(&[car(0.0, 0.0, 10.0, 10.0), car(50.0, 50.0, 60.0, 60.0)]);
        tracker.reset();
        assert_eq!(tracker.frame_count(), 0);
        let tracks = tracker.update(&[car(0.0, 0.0, 10.0, 10.0)]);
        assert_eq!(tracks[0].id, 1);
    }
}
