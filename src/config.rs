use serde_derive::{Deserialize, Serialize};

use crate::error::Error;

/// Pixel-domain optical flow search around the motion-predicted position.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct FlowConfig {
    /// Half-size of the sampled color patch.
    pub sample_radius: i32,
    pub sample_step: usize,
    /// Luma std below which the origin patch counts as textureless.
    pub min_std: f32,
    /// Extra margin (on top of `sample_radius`) that counts as "at boundary".
    pub boundary_guard: f32,
    pub base_search_radius: f32,
    pub speed_radius_gain: f32,
    pub occlusion_radius_gain: f32,
    pub max_search_radius: f32,
    pub coarse_step: i32,
    pub top_k: usize,
    /// Blend factor of the gradient re-ranking pass, 0 disables it.
    pub edge_weight: f32,
    pub distance_penalty: f32,
    pub velocity_penalty: f32,
    pub lost_score_threshold: f32,
    pub min_confidence: f32,
    pub fb_search_radius: i32,
    pub fb_threshold: f32,
    pub velocity_scale_gain: f32,
    pub max_velocity_scale: f32,
    pub consistency_sigma: f32,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            sample_radius: 10,
            sample_step: 1,
            min_std: 0.5,
            boundary_guard: 10.0,
            base_search_radius: 24.0,
            speed_radius_gain: 1.5,
            occlusion_radius_gain: 4.0,
            max_search_radius: 64.0,
            coarse_step: 3,
            top_k: 5,
            edge_weight: 0.35,
            distance_penalty: 0.4,
            velocity_penalty: 0.3,
            lost_score_threshold: 2500.0,
            min_confidence: 0.4,
            fb_search_radius: 4,
            fb_threshold: 2.0,
            velocity_scale_gain: 0.15,
            max_velocity_scale: 2.2,
            consistency_sigma: 8.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TemplateConfig {
    /// Template side is `2 * half_size + 1`.
    pub half_size: i32,
    pub search_radius: i32,
    pub coarse_step: i32,
    pub min_confidence: f32,
    /// Patches with a luma std below this are treated as flat.
    pub min_std: f32,
    pub refresh_interval: u32,
    pub refresh_min_confidence: f32,
    pub refresh_rate: f32,
    pub recovery_radius: i32,
    pub recovery_step: i32,
    pub recovery_min_confidence: f32,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            half_size: 10,
            search_radius: 20,
            coarse_step: 2,
            min_confidence: 0.5,
            min_std: 0.5,
            refresh_interval: 15,
            refresh_min_confidence: 0.75,
            refresh_rate: 0.15,
            recovery_radius: 80,
            recovery_step: 4,
            recovery_min_confidence: 0.7,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ColorConfig {
    pub sample_radius: i32,
    pub stride: usize,
    pub grid_step: i32,
    pub roi_radius: f32,
    pub min_similarity: f32,
    /// Every n-th lost frame the grid search covers the whole frame.
    pub full_frame_interval: u32,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            sample_radius: 15,
            stride: 3,
            grid_step: 12,
            roi_radius: 120.0,
            min_similarity: 0.85,
            full_frame_interval: 25,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AnchorConfig {
    pub detection_radius: i32,
    pub min_spacing: f32,
    pub min_anchors: usize,
    pub max_anchors: usize,
    /// Fraction of the strongest corner response an anchor must reach.
    pub quality_level: f32,
    pub min_response: f32,
    pub patch_half: i32,
    pub search_radius: i32,
    pub speed_boost: f32,
    pub min_confidence: f32,
    pub coherence_tolerance: f32,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            detection_radius: 24,
            min_spacing: 6.0,
            min_anchors: 3,
            max_anchors: 12,
            quality_level: 0.05,
            min_response: 25.0,
            patch_half: 4,
            search_radius: 6,
            speed_boost: 1.0,
            min_confidence: 0.5,
            coherence_tolerance: 3.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GlobalMotionConfig {
    pub enabled: bool,
    /// Probes per axis.
    pub grid: usize,
    pub patch_half: i32,
    pub search_radius: i32,
    pub coarse_step: i32,
    pub min_confidence: f32,
    pub min_probes: usize,
}

impl Default for GlobalMotionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            grid: 3,
            patch_half: 8,
            search_radius: 12,
            coarse_step: 2,
            min_confidence: 0.6,
            min_probes: 3,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct FusionConfig {
    pub flow_weight: f32,
    pub template_weight: f32,
    pub anchor_weight: f32,
    pub detector_weight: f32,
    pub gate_min: f32,
    /// Gate radius as a fraction of the adaptive search radius.
    pub gate_scale: f32,
    /// Fused confidence below this counts as a missed frame.
    pub min_confidence: f32,
    /// Radius around the prediction in which a detector box becomes a candidate.
    pub detector_radius: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            flow_weight: 1.0,
            template_weight: 0.85,
            anchor_weight: 0.9,
            detector_weight: 1.1,
            gate_min: 12.0,
            gate_scale: 0.5,
            min_confidence: 0.35,
            detector_radius: 40.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct KalmanConfig {
    pub process_noise: f32,
    pub measurement_noise: f32,
    pub smoothing_base: f32,
    pub smoothing_per_px: f32,
    pub smoothing_max: f32,
}

impl Default for KalmanConfig {
    fn default() -> Self {
        Self {
            process_noise: 4.0,
            measurement_noise: 0.2,
            smoothing_base: 0.35,
            smoothing_per_px: 0.08,
            smoothing_max: 1.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct StateConfig {
    pub occlusion_timeout: u32,
    /// Lost trackers past this many frames are skipped (never deleted).
    pub lost_timeout: u32,
    pub occluded_velocity_decay: f32,
    pub last_good_min_confidence: f32,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            occlusion_timeout: 10,
            lost_timeout: 900,
            occluded_velocity_decay: 0.8,
            last_good_min_confidence: 0.5,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RecoveryConfig {
    pub detector_radius: f32,
    pub detector_min_confidence: f32,
    pub wide_detector_interval: u32,
    pub wide_detector_radius: f32,
    pub template_interval: u32,
    pub color_interval: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            detector_radius: 60.0,
            detector_min_confidence: 0.5,
            wide_detector_interval: 3,
            wide_detector_radius: 160.0,
            template_interval: 2,
            color_interval: 5,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AiConfig {
    pub max_in_flight: usize,
    pub validation_interval: u32,
    pub validation_cooldown: u32,
    pub low_confidence: f32,
    pub reacquire_interval: u32,
    pub placeholder_labels: Vec<String>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 2,
            validation_interval: 90,
            validation_cooldown: 30,
            low_confidence: 0.5,
            reacquire_interval: 30,
            placeholder_labels: ["", "object", "unknown", "target"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl AiConfig {
    pub fn is_placeholder(&self, label: &str) -> bool {
        let label = label.trim();

        self.placeholder_labels
            .iter()
            .any(|p| p.eq_ignore_ascii_case(label))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TrackerConfig {
    pub flow: FlowConfig,
    pub template: TemplateConfig,
    pub color: ColorConfig,
    pub anchors: AnchorConfig,
    pub global_motion: GlobalMotionConfig,
    pub fusion: FusionConfig,
    pub kalman: KalmanConfig,
    pub state: StateConfig,
    pub recovery: RecoveryConfig,
    pub ai: AiConfig,
    pub trail_capacity: usize,
    /// Process trackers of one frame on the rayon pool.
    pub parallel: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            flow: FlowConfig::default(),
            template: TemplateConfig::default(),
            color: ColorConfig::default(),
            anchors: AnchorConfig::default(),
            global_motion: GlobalMotionConfig::default(),
            fusion: FusionConfig::default(),
            kalman: KalmanConfig::default(),
            state: StateConfig::default(),
            recovery: RecoveryConfig::default(),
            ai: AiConfig::default(),
            trail_capacity: 80,
            parallel: false,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), Error> {
        fn check(ok: bool, msg: &str) -> Result<(), Error> {
            if ok {
                Ok(())
            } else {
                Err(Error::InvalidConfig(msg.to_string()))
            }
        }

        check(self.flow.sample_radius > 0, "flow.sample_radius must be positive")?;
        check(self.flow.sample_step > 0, "flow.sample_step must be positive")?;
        check(self.flow.min_std > 0.0, "flow.min_std must be positive")?;
        check(self.flow.coarse_step > 0, "flow.coarse_step must be positive")?;
        check(self.flow.top_k > 0, "flow.top_k must be positive")?;
        check(
            self.flow.base_search_radius <= self.flow.max_search_radius,
            "flow.base_search_radius exceeds flow.max_search_radius",
        )?;
        check(
            self.flow.lost_score_threshold > 0.0,
            "flow.lost_score_threshold must be positive",
        )?;
        check(
            (0.0..=1.0).contains(&self.flow.edge_weight),
            "flow.edge_weight must be within [0, 1]",
        )?;
        check(self.template.half_size > 0, "template.half_size must be positive")?;
        check(self.template.coarse_step > 0, "template.coarse_step must be positive")?;
        check(self.template.recovery_step > 0, "template.recovery_step must be positive")?;
        check(
            self.template.recovery_radius >= self.template.search_radius,
            "template.recovery_radius is smaller than template.search_radius",
        )?;
        check(self.color.stride > 0, "color.stride must be positive")?;
        check(self.color.grid_step > 0, "color.grid_step must be positive")?;
        check(
            self.anchors.min_anchors <= self.anchors.max_anchors,
            "anchors.min_anchors exceeds anchors.max_anchors",
        )?;
        check(self.anchors.patch_half > 0, "anchors.patch_half must be positive")?;
        check(self.global_motion.grid > 0, "global_motion.grid must be positive")?;
        check(
            self.global_motion.coarse_step > 0,
            "global_motion.coarse_step must be positive",
        )?;
        check(
            self.kalman.process_noise > 0.0 && self.kalman.measurement_noise >= 0.0,
            "kalman noise terms must be positive",
        )?;
        check(
            self.kalman.smoothing_base <= self.kalman.smoothing_max
                && self.kalman.smoothing_max <= 1.0,
            "kalman smoothing must satisfy base <= max <= 1",
        )?;
        check(self.trail_capacity > 0, "trail_capacity must be positive")?;

        Ok(())
    }
}
