use nalgebra as na;
use tracing::trace;

use crate::config::TemplateConfig;
use crate::frame::Frame;
use crate::patch::{NccMatch, Patch};

#[inline]
fn pixel(p: &na::Point2<f32>) -> (i32, i32) {
    (p.x.round() as i32, p.y.round() as i32)
}

/// Fixed-size grayscale appearance model of the target.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub patch: Patch,
    pub frames_since_refresh: u32,
}

impl Template {
    /// Captures the template centred at `center`.
    ///
    /// `None` when the window leaves the frame or the region is flat.
    pub fn capture(frame: &Frame, center: &na::Point2<f32>, cfg: &TemplateConfig) -> Option<Self> {
        let (cx, cy) = pixel(center);
        let patch = Patch::capture(frame.luma(), cx, cy, cfg.half_size)?;

        if patch.is_flat(cfg.min_std) {
            return None;
        }

        Some(Self {
            patch,
            frames_since_refresh: 0,
        })
    }

    fn find(
        &self,
        frame: &Frame,
        center: &na::Point2<f32>,
        radius: i32,
        step: i32,
        min_confidence: f32,
        min_std: f32,
    ) -> Option<NccMatch> {
        let found = self
            .patch
            .search(frame.luma(), pixel(center), radius, step, min_std)?;

        trace!(x = found.position.x, y = found.position.y, score = found.score, radius, "template");

        Some(found).filter(|m| m.score >= min_confidence)
    }

    /// Regular per-frame search around the predicted position.
    pub fn search(
        &self,
        frame: &Frame,
        center: &na::Point2<f32>,
        cfg: &TemplateConfig,
    ) -> Option<NccMatch> {
        self.find(
            frame,
            center,
            cfg.search_radius,
            cfg.coarse_step,
            cfg.min_confidence,
            cfg.min_std,
        )
    }

    /// Wide, coarser and stricter search used while the target is lost.
    pub fn recover(
        &self,
        frame: &Frame,
        center: &na::Point2<f32>,
        cfg: &TemplateConfig,
    ) -> Option<NccMatch> {
        self.find(
            frame,
            center,
            cfg.recovery_radius,
            cfg.recovery_step,
            cfg.recovery_min_confidence,
            cfg.min_std,
        )
    }

    /// Counts a frame and, when due and `confidence` is high enough, blends
    /// the appearance at `center` into the template.
    ///
    /// Returns true when the template was refreshed.
    pub fn tick(
        &mut self,
        frame: &Frame,
        center: &na::Point2<f32>,
        confidence: f32,
        cfg: &TemplateConfig,
    ) -> bool {
        self.frames_since_refresh += 1;

        if self.frames_since_refresh < cfg.refresh_interval
            || confidence < cfg.refresh_min_confidence
        {
            return false;
        }

        let (cx, cy) = pixel(center);
        match Patch::capture(frame.luma(), cx, cy, self.patch.half) {
            Some(fresh) if !fresh.is_flat(cfg.min_std) => {
                self.patch.blend(&fresh, cfg.refresh_rate);
                self.frames_since_refresh = 0;

                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{solid_frame, textured_frame};

    #[test]
    fn follows_translation() {
        let cfg = TemplateConfig::default();
        let prev = textured_frame(160, 120, 0, 0);
        let curr = textured_frame(160, 120, 4, -2);

        let tpl = Template::capture(&prev, &na::Point2::new(70.0, 60.0), &cfg).unwrap();
        let m = tpl.search(&curr, &na::Point2::new(70.0, 60.0), &cfg).unwrap();

        assert!(m.score > 0.99);
        assert!((m.position.x - 74.0).abs() <= 0.5, "x = {}", m.position.x);
        assert!((m.position.y - 58.0).abs() <= 0.5, "y = {}", m.position.y);
    }

    #[test]
    fn capture_rejects_edges_and_flat_regions() {
        let cfg = TemplateConfig::default();
        let textured = textured_frame(100, 100, 0, 0);

        assert!(Template::capture(&textured, &na::Point2::new(5.0, 50.0), &cfg).is_none());
        assert!(Template::capture(&textured, &na::Point2::new(50.0, 95.0), &cfg).is_none());

        let flat = solid_frame(100, 100, [90, 90, 90]);
        assert!(Template::capture(&flat, &na::Point2::new(50.0, 50.0), &cfg).is_none());
    }

    #[test]
    fn flat_template_never_scores() {
        let cfg = TemplateConfig::default();
        let flat = solid_frame(200, 200, [90, 90, 90]);
        let textured = textured_frame(200, 200, 0, 0);
        let center = na::Point2::new(100.0, 100.0);

        let tpl = Template {
            patch: Patch::capture(flat.luma(), 100, 100, cfg.half_size).unwrap(),
            frames_since_refresh: 0,
        };

        for radius in [1, 5, 20, 80] {
            let wide = TemplateConfig {
                search_radius: radius,
                min_confidence: -1.0,
                ..cfg.clone()
            };

            assert!(tpl.search(&textured, &center, &wide).is_none());
            assert!(tpl.search(&flat, &center, &wide).is_none());
        }
    }

    #[test]
    fn recovery_reaches_further() {
        let cfg = TemplateConfig::default();
        let prev = textured_frame(240, 200, 0, 0);
        let curr = textured_frame(240, 200, 48, 28);
        let center = na::Point2::new(100.0, 80.0);

        let tpl = Template::capture(&prev, &center, &cfg).unwrap();

        assert!(tpl.search(&curr, &center, &cfg).map_or(true, |m| {
            (m.position - na::Point2::new(148.0, 108.0)).norm() > 2.0
        }));

        let m = tpl.recover(&curr, &center, &cfg).unwrap();
        assert!((m.position - na::Point2::new(148.0, 108.0)).norm() < 1.0);
    }

    #[test]
    fn refresh_waits_for_interval_and_confidence() {
        let cfg = TemplateConfig::default();
        let a = textured_frame(120, 120, 0, 0);
        let b = textured_frame(120, 120, 1, 1);
        let center = na::Point2::new(60.0, 60.0);

        let mut tpl = Template::capture(&a, &center, &cfg).unwrap();
        let original = tpl.patch.clone();

        for _ in 0..cfg.refresh_interval - 1 {
            assert!(!tpl.tick(&b, &center, 1.0, &cfg));
        }
        assert!(!tpl.tick(&b, &center, 0.1, &cfg));
        assert!(tpl.tick(&b, &center, 0.9, &cfg));

        assert_eq!(tpl.frames_since_refresh, 0);
        assert_ne!(tpl.patch, original);
    }
}
