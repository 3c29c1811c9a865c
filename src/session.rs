//! Stateful front end over [`pipeline::step`].
//!
//! A session owns the configuration, the previous frame and the trackers.
//! Answers from the AI service are queued through [`TrackingSession::submit`]
//! (or a cloned [`TrackingSession::event_sender`]) and applied at the start
//! of the next step, dropping any whose tracker generation has moved on.

use std::collections::HashSet;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, Sender};

use nalgebra as na;
use tracing::{debug, warn};

use crate::ai::{AiEvent, AiGate, AiRequest, AiRequestKind};
use crate::config::TrackerConfig;
use crate::detection::Detection;
use crate::error::Error;
use crate::flow;
use crate::frame::Frame;
use crate::pipeline::{self, Cause, StateChangeEvent};
use crate::track::Track;
use crate::tracker::{TrackState, Tracker, TrackerId};

/// Result of one [`TrackingSession::step`].
#[derive(Debug, Default)]
pub struct StepOutput {
    pub events: Vec<StateChangeEvent>,
    /// Requests to forward to the AI service.
    pub requests: Vec<AiRequest>,
}

pub struct TrackingSession {
    config: TrackerConfig,
    prev: Option<Frame>,
    trackers: Vec<Tracker>,
    next_id: u32,
    events_tx: Sender<AiEvent>,
    events_rx: Receiver<AiEvent>,
    gate: AiGate,
    outstanding: HashSet<TrackerId>,
    frames: u64,
}

/// Hands out a request unless one is already outstanding for the tracker or
/// the gate is full.
fn issue(
    gate: &AiGate,
    outstanding: &mut HashSet<TrackerId>,
    tracker: &mut Tracker,
    kind: AiRequestKind,
    frame: &Frame,
) -> Option<AiRequest> {
    if tracker.ai.pending || outstanding.contains(&tracker.id) {
        return None;
    }

    let permit = match gate.try_acquire() {
        Some(permit) => permit,
        None => {
            warn!(id = %tracker.id, ?kind, in_flight = gate.in_flight(), "AI request skipped, gate full");
            return None;
        }
    };

    tracker.ai.pending = true;
    outstanding.insert(tracker.id);

    debug!(id = %tracker.id, generation = tracker.generation, ?kind, "AI request issued");

    Some(AiRequest {
        tracker_id: tracker.id,
        generation: tracker.generation,
        kind,
        frame: frame.clone(),
        track: Track::from(&*tracker),
        permit,
    })
}

impl TrackingSession {
    pub fn new(config: TrackerConfig) -> Result<Self, Error> {
        config.validate()?;

        let (events_tx, events_rx) = mpsc::channel();
        let gate = AiGate::new(config.ai.max_in_flight);

        Ok(Self {
            config,
            prev: None,
            trackers: Vec::new(),
            next_id: 1,
            events_tx,
            events_rx,
            gate,
            outstanding: HashSet::new(),
            frames: 0,
        })
    }

    /// Shares an in-flight ceiling owned by the caller, e.g. across sessions.
    pub fn with_ai_gate(mut self, gate: AiGate) -> Self {
        self.gate = gate;
        self
    }

    #[inline]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    #[inline]
    pub fn ai_gate(&self) -> &AiGate {
        &self.gate
    }

    #[inline]
    pub fn trackers(&self) -> &[Tracker] {
        &self.trackers
    }

    pub fn tracker(&self, id: TrackerId) -> Option<&Tracker> {
        self.trackers.iter().find(|t| t.id == id)
    }

    pub fn tracks(&self) -> Vec<Track> {
        self.trackers.iter().map(Track::from).collect()
    }

    /// Number of frames stepped so far.
    #[inline]
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Sender for AI answers produced on other threads.
    pub fn event_sender(&self) -> Sender<AiEvent> {
        self.events_tx.clone()
    }

    /// Queues an AI answer; it is applied at the beginning of the next step.
    pub fn submit(&self, event: AiEvent) {
        // the receiver lives as long as `self`
        let _ = self.events_tx.send(event);
    }

    /// Starts tracking the point `(x, y)` of `frame` and asks the AI service
    /// what it is.
    pub fn create_tracker(
        &mut self,
        frame: &Frame,
        x: f32,
        y: f32,
    ) -> Result<(TrackerId, Option<AiRequest>), Error> {
        let id = TrackerId(self.next_id);
        let mut tracker = Tracker::acquire(id, frame, x, y, &self.config)?;
        self.next_id += 1;

        if !self.prev.as_ref().map_or(false, |p| p.same_dims(frame)) {
            self.prev = Some(frame.clone());
        }

        let request = issue(
            &self.gate,
            &mut self.outstanding,
            &mut tracker,
            AiRequestKind::Identify { x, y },
            frame,
        );

        self.trackers.push(tracker);

        Ok((id, request))
    }

    /// Drops a tracker. Answers still in flight for it are ignored.
    pub fn remove_tracker(&mut self, id: TrackerId) -> Result<Tracker, Error> {
        let idx = self
            .trackers
            .iter()
            .position(|t| t.id == id)
            .ok_or(Error::UnknownTracker(id))?;

        self.outstanding.remove(&id);
        debug!(%id, "tracker removed");

        Ok(self.trackers.remove(idx))
    }

    /// Applies queued AI answers, advances every tracker onto `frame` and
    /// schedules new AI requests.
    pub fn step(&mut self, frame: Frame, detections: &[Detection], now: f32) -> StepOutput {
        let mut events = self.apply_ai_events(now);

        let changes = pipeline::step(
            self.prev.as_ref(),
            &frame,
            &mut self.trackers,
            detections,
            &self.config,
            now,
        );

        let requests = self.schedule_ai(&frame, &changes);
        events.extend(changes);

        self.prev = Some(frame);
        self.frames += 1;

        StepOutput { events, requests }
    }

    fn apply_ai_events(&mut self, now: f32) -> Vec<StateChangeEvent> {
        let mut changes = Vec::new();

        while let Ok(event) = self.events_rx.try_recv() {
            let id = event.tracker_id();
            let tracker = match self.trackers.iter_mut().find(|t| t.id == id) {
                Some(t) => t,
                None => {
                    debug!(%id, "AI answer for a removed tracker ignored");
                    continue;
                }
            };

            tracker.ai.pending = false;
            self.outstanding.remove(&id);

            let generation = event.generation();
            let current = tracker.generation == generation;
            let from = tracker.state;

            match event {
                AiEvent::Identification(ev) => {
                    debug!(%id, label = %ev.label, "identified");

                    tracker.ai.label = ev.label;
                    tracker.ai.description = ev.description;
                    tracker.ai.features = ev.features;
                    tracker.ai.reference_image = ev.reference_image;
                }

                AiEvent::Validation(_) | AiEvent::Reacquisition(_) if !current => {
                    debug!(%id, generation = tracker.generation, stale = generation, "stale AI answer discarded");
                }

                AiEvent::Validation(ev) => {
                    tracker.ai.last_observation = ev.observation;

                    if !ev.is_valid && !tracker.state.is_lost() {
                        debug!(%id, confidence = ev.confidence, "validation rejected target");
                        tracker.mark_lost();
                    }
                }

                AiEvent::Reacquisition(ev) if ev.found && tracker.state.is_lost() => {
                    let position = na::Point2::new(ev.x, ev.y);
                    let finite = ev.x.is_finite() && ev.y.is_finite();
                    let frame = match &self.prev {
                        Some(f) if finite && !flow::at_boundary(f, &position, &self.config.flow) => f,
                        _ => {
                            debug!(%id, x = ev.x, y = ev.y, "reacquired position unusable");
                            continue;
                        }
                    };

                    tracker.reacquire(position, ev.confidence, frame, &self.config);
                }

                AiEvent::Reacquisition(_) => {}

                AiEvent::Failed { error, .. } => {
                    warn!(%id, %error, "AI request failed");
                }
            }

            if tracker.state != from {
                let cause = if tracker.state == TrackState::Tracking {
                    Cause::AiReacquisition
                } else {
                    Cause::Validation
                };

                changes.push(StateChangeEvent {
                    tracker_id: id,
                    from,
                    to: tracker.state,
                    cause,
                    ts: now,
                });
            }
        }

        changes
    }

    fn schedule_ai(&mut self, frame: &Frame, changes: &[StateChangeEvent]) -> Vec<AiRequest> {
        let cfg = &self.config;
        let mut requests = Vec::new();

        for tracker in self.trackers.iter_mut() {
            if tracker.is_dormant(cfg) {
                continue;
            }

            let kind = if tracker.state.is_lost() {
                let due = cfg.ai.reacquire_interval > 0
                    && tracker.frames_lost > 0
                    && tracker.frames_lost % cfg.ai.reacquire_interval == 0;

                if !due || cfg.ai.is_placeholder(tracker.label()) {
                    continue;
                }

                AiRequestKind::Reacquire {
                    label: tracker.ai.label.clone(),
                }
            } else {
                tracker.ai.frames_since_validation += 1;
                tracker.ai.validation_cooldown = tracker.ai.validation_cooldown.saturating_sub(1);

                let entered_occlusion = changes
                    .iter()
                    .any(|c| c.tracker_id == tracker.id && c.to == TrackState::Occluded);
                let doubtful = tracker.confidence < cfg.ai.low_confidence && tracker.ai.validation_cooldown == 0;
                let periodic = cfg.ai.validation_interval > 0
                    && tracker.ai.frames_since_validation >= cfg.ai.validation_interval;

                if !(entered_occlusion || doubtful || periodic) {
                    continue;
                }

                AiRequestKind::Validate
            };

            let is_validation = kind == AiRequestKind::Validate;
            if let Some(request) = issue(&self.gate, &mut self.outstanding, tracker, kind, frame) {
                if is_validation {
                    tracker.ai.frames_since_validation = 0;
                    tracker.ai.validation_cooldown = cfg.ai.validation_cooldown;
                }

                requests.push(request);
            }
        }

        requests
    }
}

impl crate::Tracking for TrackingSession {
    #[inline]
    fn update(&mut self, frame: Frame, detections: &[Detection], ts: f32) -> StepOutput {
        self.step(frame, detections, ts)
    }

    fn tracks(&self) -> Rc<[Track]> {
        TrackingSession::tracks(self).into()
    }
}
