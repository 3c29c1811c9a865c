mod common;

use common::{black, square};
use nalgebra as na;
use qtrack_fusion::ai::{IdentificationEvent, ValidationEvent};
use qtrack_fusion::bbox::BBox;
use qtrack_fusion::flow::{self, FlowQuery};
use qtrack_fusion::global_motion::GlobalMotion;
use qtrack_fusion::pipeline;
use qtrack_fusion::{
    AiEvent, Cause, Detection, TrackState, Tracker, TrackerConfig, TrackerId, TrackingSession,
};

#[test]
fn follows_square_moving_right() {
    let mut session = TrackingSession::new(TrackerConfig::default()).unwrap();
    let (id, _) = session.create_tracker(&square(200, 200, 100, 100), 100.0, 100.0).unwrap();

    let out = session.step(square(200, 200, 110, 100), &[], 0.033);
    assert!(out.events.is_empty());

    let t = session.tracker(id).unwrap();
    assert_eq!(t.state, TrackState::Tracking);
    assert!((t.position - na::Point2::new(110.0, 100.0)).norm() < 1.0, "at {:?}", t.position);
    assert!(t.confidence > 0.6, "confidence {}", t.confidence);
    assert_eq!(t.frames_occluded, 0);
}

#[test]
fn target_leaving_the_frame_is_lost() {
    let mut session = TrackingSession::new(TrackerConfig::default()).unwrap();
    let (id, _) = session.create_tracker(&square(200, 200, 160, 100), 160.0, 100.0).unwrap();

    session.step(square(200, 200, 170, 100), &[], 0.033);
    assert_eq!(session.tracker(id).unwrap().state, TrackState::Tracking);

    let out = session.step(black(200, 200), &[], 0.066);

    let ev = out.events.iter().find(|e| e.tracker_id == id).unwrap();
    assert_eq!((ev.to, ev.cause), (TrackState::Lost, Cause::Boundary));

    let t = session.tracker(id).unwrap();
    assert_eq!(t.state, TrackState::Lost);
    assert_eq!(t.confidence, 0.0);
}

#[test]
fn empty_frames_never_confirm_a_vanished_target() {
    let mut session = TrackingSession::new(TrackerConfig::default()).unwrap();
    let (id, _) = session.create_tracker(&square(200, 200, 100, 100), 100.0, 100.0).unwrap();

    for i in 0..30 {
        session.step(black(200, 200), &[], i as f32);

        let t = session.tracker(id).unwrap();
        assert_ne!(t.state, TrackState::Tracking, "step {}", i);
        assert_eq!(t.confidence, 0.0);
    }

    assert!(session.tracker(id).unwrap().state.is_lost());
}

#[test]
fn lost_tracker_returns_on_detector_box() {
    let mut session = TrackingSession::new(TrackerConfig::default()).unwrap();
    let f0 = square(200, 200, 100, 100);
    let (id, _) = session.create_tracker(&f0, 100.0, 100.0).unwrap();

    session.submit(AiEvent::Identification(IdentificationEvent {
        tracker_id: id,
        generation: 0,
        label: "Red Forceps".into(),
        description: None,
        features: Vec::new(),
        reference_image: None,
    }));
    session.submit(AiEvent::Validation(ValidationEvent {
        tracker_id: id,
        generation: 0,
        is_valid: false,
        confidence: 0.8,
        observation: None,
    }));

    session.step(f0.clone(), &[], 0.0);
    assert!(session.tracker(id).unwrap().state.is_lost());

    let det = Detection::pixel(BBox::ltrb(94.0, 88.0, 114.0, 108.0), "red forceps", 0.6);
    let out = session.step(black(200, 200), &[det], 0.033);

    let ev = out.events.iter().find(|e| e.tracker_id == id).unwrap();
    assert_eq!((ev.to, ev.cause), (TrackState::Tracking, Cause::Detector));

    let t = session.tracker(id).unwrap();
    assert_eq!(t.position, na::Point2::new(104.0, 98.0));
    assert_eq!(t.velocity, na::Vector2::zeros());
    assert_eq!(t.frames_lost, 0);
}

#[test]
fn prediction_in_guard_band_is_lost_within_the_step() {
    let cfg = TrackerConfig::default();

    for &x in &[30, 45, 100, 155, 170] {
        for &vx in &[-12.0f32, -6.0, 0.0, 6.0, 12.0] {
            let frame = square(200, 200, x, 100);
            let mut t = Tracker::acquire(TrackerId(1), &frame, x as f32, 100.0, &cfg).unwrap();
            t.velocity = na::Vector2::new(vx, 0.0);
            t.kalman.velocity = t.velocity;

            let predicted = flow::predict(
                &FlowQuery {
                    position: t.position,
                    velocity: t.velocity,
                    global: GlobalMotion::default(),
                    frames_occluded: 0,
                },
                &cfg.flow,
            );

            let mut trackers = vec![t];
            pipeline::step(Some(&frame), &frame, &mut trackers, &[], &cfg, 0.0);

            if flow::at_boundary(&frame, &predicted, &cfg.flow) {
                assert_eq!(trackers[0].state, TrackState::Lost, "x={} vx={}", x, vx);
                assert_eq!(trackers[0].confidence, 0.0);
            } else {
                assert_ne!(trackers[0].state, TrackState::Lost, "x={} vx={}", x, vx);
            }
        }
    }
}

#[test]
fn resized_frame_is_not_compared() {
    let mut session = TrackingSession::new(TrackerConfig::default()).unwrap();
    let (id, _) = session.create_tracker(&square(200, 200, 100, 100), 100.0, 100.0).unwrap();

    let out = session.step(square(320, 240, 100, 100), &[], 0.033);
    assert!(out.events.is_empty());

    let t = session.tracker(id).unwrap();
    assert_eq!(t.position, na::Point2::new(100.0, 100.0));
    assert!(t.trail.is_empty());

    // the resized frame is the new reference
    session.step(square(320, 240, 104, 100), &[], 0.066);
    let t = session.tracker(id).unwrap();
    assert_eq!(t.state, TrackState::Tracking);
    assert!(t.position.x > 101.5);
}

#[test]
fn normalized_detection_recovers_lost_tracker() {
    let cfg = TrackerConfig::default();
    let frame = square(200, 200, 100, 100);
    let mut t = Tracker::acquire(TrackerId(5), &frame, 100.0, 100.0, &cfg).unwrap();
    t.mark_lost();

    let det = Detection::normalized(BBox::ltrb(0.45, 0.45, 0.55, 0.55), "anything", 0.7).with_track_id(5);
    let mut trackers = vec![t];
    let events = pipeline::step(Some(&frame), &black(200, 200), &mut trackers, &[det], &cfg, 1.0);

    assert_eq!(events[0].cause, Cause::Detector);
    assert!((trackers[0].position - na::Point2::new(100.0, 100.0)).norm() < 1e-3);
}
