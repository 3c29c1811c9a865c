//! Contracts with the identification / validation / re-acquisition service.
//!
//! The core never talks to the service. It hands out [`AiRequest`]s and takes
//! back [`AiEvent`]s, each tagged with the tracker generation it was issued
//! under.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_derive::{Deserialize, Serialize};

use crate::frame::Frame;
use crate::track::Track;
use crate::tracker::TrackerId;

/// Caller-owned ceiling on concurrently outstanding requests.
///
/// Clones share the same counter.
#[derive(Debug, Clone)]
pub struct AiGate {
    max_in_flight: usize,
    in_flight: Arc<AtomicUsize>,
}

impl AiGate {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            max_in_flight,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[inline]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    #[inline]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Reserves a slot, `None` when the ceiling is reached.
    pub fn try_acquire(&self) -> Option<AiPermit> {
        let mut current = self.in_flight.load(Ordering::Acquire);

        loop {
            if current >= self.max_in_flight {
                return None;
            }

            match self.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(AiPermit {
                        counter: self.in_flight.clone(),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }
}

/// Slot held by an outstanding request; released on drop.
#[derive(Debug)]
pub struct AiPermit {
    counter: Arc<AtomicUsize>,
}

impl Drop for AiPermit {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum AiRequestKind {
    /// Describe what is under `(x, y)`.
    Identify { x: f32, y: f32 },
    /// Is the tracker still on its target?
    Validate,
    /// Find the labelled target anywhere in the frame.
    Reacquire { label: String },
}

/// A request to hand to the AI service.
///
/// Keep the request (or at least its permit) alive until the answer has been
/// submitted back; dropping it frees the in-flight slot.
#[derive(Debug)]
pub struct AiRequest {
    pub tracker_id: TrackerId,
    pub generation: u64,
    pub kind: AiRequestKind,
    pub frame: Frame,
    pub track: Track,
    pub permit: AiPermit,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IdentificationEvent {
    pub tracker_id: TrackerId,
    pub generation: u64,
    pub label: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub reference_image: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ValidationEvent {
    pub tracker_id: TrackerId,
    pub generation: u64,
    pub is_valid: bool,
    pub confidence: f32,
    #[serde(default)]
    pub observation: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ReacquisitionEvent {
    pub tracker_id: TrackerId,
    pub generation: u64,
    pub found: bool,
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    #[serde(default)]
    pub confidence: f32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum AiEvent {
    Identification(IdentificationEvent),
    Validation(ValidationEvent),
    Reacquisition(ReacquisitionEvent),
    /// The service errored or timed out.
    Failed {
        tracker_id: TrackerId,
        generation: u64,
        error: String,
    },
}

impl AiEvent {
    pub fn tracker_id(&self) -> TrackerId {
        match self {
            AiEvent::Identification(e) => e.tracker_id,
            AiEvent::Validation(e) => e.tracker_id,
            AiEvent::Reacquisition(e) => e.tracker_id,
            AiEvent::Failed { tracker_id, .. } => *tracker_id,
        }
    }

    pub fn generation(&self) -> u64 {
        match self {
            AiEvent::Identification(e) => e.generation,
            AiEvent::Validation(e) => e.generation,
            AiEvent::Reacquisition(e) => e.generation,
            AiEvent::Failed { generation, .. } => *generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_enforces_ceiling_and_releases_on_drop() {
        let gate = AiGate::new(2);

        let a = gate.try_acquire().unwrap();
        let b = gate.try_acquire().unwrap();
        assert!(gate.try_acquire().is_none());
        assert_eq!(gate.in_flight(), 2);

        drop(a);
        assert_eq!(gate.in_flight(), 1);

        let shared = gate.clone();
        let c = shared.try_acquire().unwrap();
        assert!(gate.try_acquire().is_none());

        drop(b);
        drop(c);
        assert_eq!(gate.in_flight(), 0);
    }

    #[test]
    fn zero_ceiling_rejects_everything() {
        assert!(AiGate::new(0).try_acquire().is_none());
    }

    #[test]
    fn events_parse_from_service_json() {
        let ev: AiEvent = serde_json::from_str(
            r#"{"type": "validation", "tracker_id": 3, "generation": 2, "is_valid": false, "confidence": 0.9}"#,
        )
        .unwrap();

        assert_eq!(ev.tracker_id(), TrackerId(3));
        assert_eq!(ev.generation(), 2);
        assert!(matches!(ev, AiEvent::Validation(ValidationEvent { is_valid: false, observation: None, .. })));

        let ev: AiEvent = serde_json::from_str(
            r#"{"type": "failed", "tracker_id": 1, "generation": 0, "error": "timeout"}"#,
        )
        .unwrap();
        assert_eq!(ev.tracker_id(), TrackerId(1));
    }
}
