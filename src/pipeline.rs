//! Per-source orchestrator.
//!
//! One `Pipeline` per video/camera source. Each frame runs
//! gate -> tracker -> one-shot identity resolution -> event detector -> ledger.
//! Pipelines for different sources may share one `ParkingLedger`.
//!
//! A storage failure on one event does not stop the rest of the frame; the
//! failed events come back in `FrameError::unapplied` for `Pipeline::retry`.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::clock::Clock;
use crate::detect::{Detection, DetectionGate};
use crate::events::{CrossingEvent, EntryDirection, EventDetector, EventKind, DEFAULT_HISTORY_LEN};
use crate::identity::{
    new_session_tag, normalize_plate, placeholder_plate, FrameImage, IdentityCache,
    IdentityClassifier, IdentityOutcome, ResolvedIdentity, VehicleIdentity, DEFAULT_PLATE_PREFIX,
};
use crate::ledger::{EntryOutcome, ExitOutcome, ParkingLedger, DEFAULT_SOURCE_ID};
use crate::tracker::{Track, Tracker, TrackerConfig};

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub tracker: TrackerConfig,
    pub line_position: f32,
    pub entry_direction: EntryDirection,
    pub history_len: usize,
    pub plate_prefix: String,
    pub gate: DetectionGate,
    /// Camera name written to the crossing log.
    pub source_id: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tracker: TrackerConfig::default(),
            line_position: 400.0,
            entry_direction: EntryDirection::Down,
            history_len: DEFAULT_HISTORY_LEN,
            plate_prefix: DEFAULT_PLATE_PREFIX.to_string(),
            gate: DetectionGate::default(),
            source_id: DEFAULT_SOURCE_ID.to_string(),
        }
    }
}

/// What the ledger did with one crossing event.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LedgerOutcome {
    Entry {
        track_id: u64,
        plate: String,
        outcome: EntryOutcome,
    },
    Exit {
        track_id: u64,
        plate: String,
        outcome: ExitOutcome,
    },
}

/// Identity resolved for a track during this frame.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackIdentity {
    pub track_id: u64,
    pub outcome: IdentityOutcome,
    pub resolved: ResolvedIdentity,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameReport {
    pub tracks: Vec<Track>,
    pub events: Vec<CrossingEvent>,
    pub ledger: Vec<LedgerOutcome>,
    pub identities: Vec<TrackIdentity>,
}

/// Ledger or clock failure during a frame.
///
/// `report` still holds the tracks and events of the frame plus every ledger
/// outcome that was applied. `unapplied` lists the events whose ledger write
/// failed; `source` is the first of those failures.
#[derive(Debug)]
pub struct FrameError {
    pub report: FrameReport,
    pub unapplied: Vec<CrossingEvent>,
    pub source: anyhow::Error,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unapplied.is_empty() {
            write!(f, "frame processing failed: {}", self.source)
        } else {
            write!(
                f,
                "frame processing failed: {} event(s) not applied: {}",
                self.unapplied.len(),
                self.source
            )
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub frames: u64,
    pub events: u64,
    pub identity_failures: u64,
    pub skipped_events: u64,
}

pub struct Pipeline {
    config: PipelineConfig,
    tracker: Tracker,
    detector: EventDetector,
    identities: IdentityCache,
    classifier: Box<dyn IdentityClassifier>,
    ledger: Arc<ParkingLedger>,
    clock: Arc<dyn Clock>,
    stats: PipelineStats,
    session_tag: String,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        mut classifier: Box<dyn IdentityClassifier>,
        ledger: Arc<ParkingLedger>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if config.plate_prefix.trim().is_empty() {
            return Err(anyhow!("plate prefix must not be empty"));
        }
        if config.source_id.trim().is_empty() {
            return Err(anyhow!("source id must not be empty"));
        }
        classifier.warm_up()?;
        let session_tag = new_session_tag();
        log::info!(
            "pipeline: source={} session={} classifier={} line={} entry={}",
            config.source_id,
            session_tag,
            classifier.name(),
            config.line_position,
            config.entry_direction
        );
        Ok(Self {
            tracker: Tracker::new(config.tracker),
            detector: EventDetector::with_history_len(
                config.line_position,
                config.entry_direction,
                config.history_len,
            ),
            identities: IdentityCache::new(),
            classifier,
            ledger,
            clock,
            stats: PipelineStats::default(),
            session_tag,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn ledger(&self) -> &Arc<ParkingLedger> {
        &self.ledger
    }

    pub fn identity(&self, track_id: u64) -> Option<&ResolvedIdentity> {
        self.identities.get(track_id)
    }

    pub fn cached_identities(&self) -> usize {
        self.identities.len()
    }

    /// Tag embedded in placeholder plates issued since the last reset.
    pub fn session_tag(&self) -> &str {
        &self.session_tag
    }

    /// Names the camera for crossings logged from now on.
    pub fn set_source_id(&mut self, source_id: &str) -> Result<()> {
        if source_id.trim().is_empty() {
            return Err(anyhow!("source id must not be empty"));
        }
        self.config.source_id = source_id.to_string();
        Ok(())
    }

    /// Runs one frame. Calls for one source must be serialized.
    pub fn process_frame(
        &mut self,
        image: &FrameImage<'_>,
        detections: &[Detection],
    ) -> Result<FrameReport, FrameError> {
        self.stats.frames += 1;
        let mut report = FrameReport::default();

        let gated = self
            .config
            .gate
            .filter(detections, image.width(), image.height());
        if gated.len() != detections.len() {
            log::debug!(
                "pipeline: gate kept {}/{} detections",
                gated.len(),
                detections.len()
            );
        }

        report.tracks = self.tracker.update(&gated);

        let now_s = match self.clock.now_s() {
            Ok(now) => now,
            Err(source) => {
                return Err(FrameError {
                    report,
                    unapplied: Vec::new(),
                    source,
                })
            }
        };

        self.resolve_identities(image, now_s, &mut report);

        report.events = self.detector.detect(&report.tracks, now_s);
        self.stats.events += report.events.len() as u64;

        let events = report.events.clone();
        match self.apply_events(&events, &mut report) {
            Some((unapplied, source)) => Err(FrameError {
                report,
                unapplied,
                source,
            }),
            None => Ok(report),
        }
    }

    /// Applies events a failed frame left in `FrameError::unapplied`.
    ///
    /// Plates come from the identity cache, so retries must happen before
    /// `reset()`; after it the events are skipped as unidentified.
    pub fn retry(&mut self, events: &[CrossingEvent]) -> Result<FrameReport, FrameError> {
        let mut report = FrameReport {
            events: events.to_vec(),
            ..FrameReport::default()
        };
        match self.apply_events(events, &mut report) {
            Some((unapplied, source)) => Err(FrameError {
                report,
                unapplied,
                source,
            }),
            None => Ok(report),
        }
    }

    /// Applies every event in order. Returns the events that failed together
    /// with the first error, or `None` when all were applied.
    fn apply_events(
        &mut self,
        events: &[CrossingEvent],
        report: &mut FrameReport,
    ) -> Option<(Vec<CrossingEvent>, anyhow::Error)> {
        let mut unapplied = Vec::new();
        let mut first_err = None;
        for event in events {
            log::info!("pipeline: track {} {}", event.track_id, event.kind);
            if let Err(err) = self.apply_event(event, report) {
                log::error!(
                    "pipeline: ledger write for track {} {} failed: {:#}",
                    event.track_id,
                    event.kind,
                    err
                );
                unapplied.push(event.clone());
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
        first_err.map(|err| (unapplied, err))
    }

    fn resolve_identities(&mut self, image: &FrameImage<'_>, now_s: u64, report: &mut FrameReport) {
        for track in &report.tracks {
            if self.identities.contains(track.id) {
                continue;
            }
            let crop = image.crop(&track.bbox);
            let (outcome, resolved) = match self.classifier.classify(&crop) {
                Ok(identity) => match identity.plate.as_deref().and_then(normalize_plate) {
                    Some(plate) => {
                        let resolved = ResolvedIdentity {
                            plate: plate.clone(),
                            brand: identity.brand.clone(),
                            color: identity.color.clone(),
                            placeholder: false,
                        };
                        let identity = VehicleIdentity {
                            plate: Some(plate),
                            ..identity
                        };
                        (IdentityOutcome::Resolved(identity), resolved)
                    }
                    // Brand and color are still usable without a plate.
                    None => (
                        IdentityOutcome::Failed("unreadable plate".to_string()),
                        self.placeholder(now_s, track.id, identity.brand, identity.color),
                    ),
                },
                Err(err) => (
                    IdentityOutcome::Failed(err.to_string()),
                    self.placeholder(now_s, track.id, None, None),
                ),
            };

            if let IdentityOutcome::Failed(reason) = &outcome {
                self.stats.identity_failures += 1;
                log::warn!(
                    "pipeline: identity for track {} failed ({}), using {}",
                    track.id,
                    reason,
                    resolved.plate
                );
            }
            self.identities.insert(track.id, resolved.clone());
            report.identities.push(TrackIdentity {
                track_id: track.id,
                outcome,
                resolved,
            });
        }
    }

    fn placeholder(
        &self,
        now_s: u64,
        track_id: u64,
        brand: Option<String>,
        color: Option<String>,
    ) -> ResolvedIdentity {
        ResolvedIdentity {
            plate: placeholder_plate(
                &self.config.plate_prefix,
                now_s,
                &self.session_tag,
                track_id,
            ),
            brand,
            color,
            placeholder: true,
        }
    }

    fn apply_event(&mut self, event: &CrossingEvent, report: &mut FrameReport) -> Result<()> {
        let Some(identity) = self.identities.get(event.track_id) else {
            self.stats.skipped_events += 1;
            log::warn!(
                "pipeline: no identity for track {}, skipping {}",
                event.track_id,
                event.kind
            );
            return Ok(());
        };

        let outcome = match event.kind {
            EventKind::Entry => LedgerOutcome::Entry {
                track_id: event.track_id,
                plate: identity.plate.clone(),
                outcome: self.ledger.apply_entry_from(
                    &self.config.source_id,
                    &identity.plate,
                    event.track_id,
                    identity.brand.as_deref(),
                    identity.color.as_deref(),
                )?,
            },
            EventKind::Exit => LedgerOutcome::Exit {
                track_id: event.track_id,
                plate: identity.plate.clone(),
                outcome: self.ledger.apply_exit_from(
                    &self.config.source_id,
                    &identity.plate,
                    Some(event.track_id),
                )?,
            },
        };
        report.ledger.push(outcome);
        Ok(())
    }

    /// Starts a new source session. Tracker ids restart at 1; identity cache,
    /// event history and statistics are cleared and a new session tag is
    /// drawn. Ledger storage is untouched.
    pub fn reset(&mut self) {
        self.tracker.reset();
        self.detector.reset();
        self.identities.clear();
        self.stats = PipelineStats::default();
        let mut tag = new_session_tag();
        while tag == self.session_tag {
            tag = new_session_tag();
        }
        self.session_tag = tag;
        log::info!("pipeline: reset, session={}", self.session_tag);
    }
}
