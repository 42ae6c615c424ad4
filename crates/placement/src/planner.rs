//! Placement planning.
//!
//! Every trajectory produced here keeps its layer inside
//! `[0, W-w] × [0, H-h]` for all `t >= 0`, and is validated before it is
//! returned so malformed values never reach filter-graph rendering.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use inkmark_common::error::{InkmarkError, InkmarkResult};
use inkmark_job_model::{
    Corner, LayerMotion, MediaKind, Placement, PlacementMode, PlacementPlan, PlacementTrajectory,
    Point, Size, StyleSettings,
};

/// Tunables for the moving modes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Slide period at speed 1.0.
    pub slide_period_secs: f64,

    /// Lissajous angular speed (rad/s) at speed 1.0.
    pub lissajous_speed: f64,

    /// Frequency ratio between the y and x axes. Non-integer so the
    /// path does not visibly repeat on short cycles.
    pub lissajous_ratio: f64,

    /// Horizontal amplitude divisor: amplitude = (W-w)/k1.
    pub lissajous_k1: f64,

    /// Vertical amplitude divisor: amplitude = (H-h)/k2.
    pub lissajous_k2: f64,

    /// Upper bound on distinct Hop waypoints; longer media cycles them.
    pub hop_max_waypoints: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            slide_period_secs: 12.0,
            lissajous_speed: 0.35,
            lissajous_ratio: 2.2,
            lissajous_k1: 2.0,
            lissajous_k2: 2.5,
            hop_max_waypoints: 64,
        }
    }
}

/// Computes per-layer trajectories.
#[derive(Debug, Clone, Default)]
pub struct PlacementPlanner {
    config: PlannerConfig,
}

impl PlacementPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Images cannot move, so any mode degrades to a static corner mark.
    pub fn effective_mode(mode: PlacementMode, kind: MediaKind) -> PlacementMode {
        match kind {
            MediaKind::Image => PlacementMode::Static,
            MediaKind::Video => mode,
        }
    }

    /// Plan every layer of `style.mode` for a frame of `frame` pixels.
    ///
    /// `marks[i]` is the rasterized size of layer `i`, in the order given by
    /// [`PlacementMode::layers`].
    pub fn plan(
        &self,
        style: &StyleSettings,
        kind: MediaKind,
        frame: Size,
        marks: &[Size],
        duration_secs: f64,
        seed: u64,
    ) -> InkmarkResult<PlacementPlan> {
        let mode = Self::effective_mode(style.mode, kind);
        let motions = mode.layers();
        if motions.len() != marks.len() {
            return Err(InkmarkError::render(format!(
                "{mode} expects {} watermark layers, got {}",
                motions.len(),
                marks.len()
            )));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let layers = motions
            .iter()
            .zip(marks)
            .map(|(&motion, &mark)| {
                let trajectory =
                    self.plan_layer(motion, style, frame, mark, duration_secs, &mut rng)?;
                Ok(Placement {
                    motion,
                    mark,
                    trajectory,
                })
            })
            .collect::<InkmarkResult<Vec<_>>>()?;

        tracing::debug!(%mode, %frame, layers = layers.len(), "Placement planned");
        Ok(PlacementPlan {
            frame,
            duration_secs,
            layers,
        })
    }

    /// Plan a single layer.
    pub fn plan_layer<R: Rng>(
        &self,
        motion: LayerMotion,
        style: &StyleSettings,
        frame: Size,
        mark: Size,
        duration_secs: f64,
        rng: &mut R,
    ) -> InkmarkResult<PlacementTrajectory> {
        if frame.is_empty() || !frame.contains(mark) {
            return Err(InkmarkError::render(format!(
                "watermark {mark} does not fit frame {frame}"
            )));
        }
        if !(style.speed.is_finite() && style.speed > 0.0) {
            return Err(InkmarkError::invalid_input("speed must be a positive number"));
        }

        let free_w = (frame.width - mark.width) as f64;
        let free_h = (frame.height - mark.height) as f64;
        let margin = style.margin as f64;

        let trajectory = match motion {
            LayerMotion::Static => {
                let (x, y) = corner_position(style.corner, free_w, free_h, margin);
                PlacementTrajectory::Static { x, y }
            }
            LayerMotion::Slide => PlacementTrajectory::Slide {
                period_secs: self.config.slide_period_secs / style.speed,
                span: free_w,
                y: (free_h - margin).max(0.0),
            },
            LayerMotion::Hop => self.plan_hop(style, frame, mark, duration_secs, rng)?,
            LayerMotion::Lissajous => PlacementTrajectory::Lissajous {
                center: Point::new(free_w / 2.0, free_h / 2.0),
                amplitude: Point::new(
                    (free_w / self.config.lissajous_k1).min(free_w / 2.0),
                    (free_h / self.config.lissajous_k2).min(free_h / 2.0),
                ),
                speed: self.config.lissajous_speed * style.speed,
                ratio: self.config.lissajous_ratio,
            },
        };

        trajectory.validate(frame, mark)?;
        Ok(trajectory)
    }

    fn plan_hop<R: Rng>(
        &self,
        style: &StyleSettings,
        frame: Size,
        mark: Size,
        duration_secs: f64,
        rng: &mut R,
    ) -> InkmarkResult<PlacementTrajectory> {
        let window = style.hop_window_secs;
        if !(window.is_finite() && window > 0.0) {
            return Err(InkmarkError::invalid_input("hop window must be positive"));
        }

        let windows = if duration_secs.is_finite() && duration_secs > 0.0 {
            (duration_secs / window).ceil().max(1.0) as usize
        } else {
            usize::MAX
        };
        let count = windows.min(self.config.hop_max_waypoints.max(1));

        let (x_lo, x_hi) = margin_range(frame.width - mark.width, style.margin);
        let (y_lo, y_hi) = margin_range(frame.height - mark.height, style.margin);
        let waypoints = (0..count)
            .map(|_| {
                Point::new(
                    rng.random_range(x_lo..=x_hi) as f64,
                    rng.random_range(y_lo..=y_hi) as f64,
                )
            })
            .collect();

        Ok(PlacementTrajectory::Hop {
            waypoints,
            window_secs: window,
            repeat: windows > count,
        })
    }
}

fn corner_position(corner: Corner, free_w: f64, free_h: f64, margin: f64) -> (f64, f64) {
    let near_x = margin.min(free_w);
    let near_y = margin.min(free_h);
    let far_x = (free_w - margin).max(0.0);
    let far_y = (free_h - margin).max(0.0);
    match corner {
        Corner::TopLeft => (near_x, near_y),
        Corner::TopRight => (far_x, near_y),
        Corner::BottomLeft => (near_x, far_y),
        Corner::BottomRight => (far_x, far_y),
    }
}

/// `[margin, free - margin]`, or `[0, free]` when the margin leaves no room.
fn margin_range(free: u32, margin: u32) -> (u32, u32) {
    if free >= margin.saturating_mul(2) {
        (margin, free - margin)
    } else {
        (0, free)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn style(mode: PlacementMode) -> StyleSettings {
        StyleSettings {
            mode,
            ..StyleSettings::default()
        }
    }

    #[test]
    fn test_static_bottom_right_720p() {
        let planner = PlacementPlanner::default();
        let frame = Size::new(1280, 720);
        let mark = Size::new(260, 44);
        let plan = planner
            .plan(&style(PlacementMode::Static), MediaKind::Video, frame, &[mark], 30.0, 1)
            .unwrap();

        let traj = &plan.layers[0].trajectory;
        let expected = Point::new((1280 - 260 - 20) as f64, (720 - 44 - 20) as f64);
        for t in [0.0, 7.5, 15.0, 29.99, 30.0] {
            assert_eq!(traj.position_at(t), Some(expected));
        }
    }

    #[test]
    fn test_hop_partial_last_window() {
        let planner = PlacementPlanner::default();
        let mut s = style(PlacementMode::Hop);
        s.hop_window_secs = 10.0;
        let frame = Size::new(1280, 720);
        let plan = planner
            .plan(&s, MediaKind::Video, frame, &[Size::new(200, 30)], 25.0, 42)
            .unwrap();

        let traj = &plan.layers[0].trajectory;
        let PlacementTrajectory::Hop {
            waypoints, repeat, ..
        } = traj
        else {
            panic!("expected hop");
        };
        assert_eq!(waypoints.len(), 3);
        assert!(!repeat);
        assert_eq!(traj.active_waypoint(0.0), Some(0));
        assert_eq!(traj.active_waypoint(9.99), Some(0));
        assert_eq!(traj.active_waypoint(10.0), Some(1));
        assert_eq!(traj.active_waypoint(19.99), Some(1));
        assert_eq!(traj.active_waypoint(20.0), Some(2));
        assert_eq!(traj.active_waypoint(24.99), Some(2));
    }

    #[test]
    fn test_hop_is_deterministic_per_seed() {
        let planner = PlacementPlanner::default();
        let s = style(PlacementMode::Hop);
        let frame = Size::new(640, 360);
        let mark = Size::new(100, 20);
        let a = planner.plan(&s, MediaKind::Video, frame, &[mark], 60.0, 7).unwrap();
        let b = planner.plan(&s, MediaKind::Video, frame, &[mark], 60.0, 7).unwrap();
        let c = planner.plan(&s, MediaKind::Video, frame, &[mark], 60.0, 8).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_hop_caps_waypoints_and_repeats() {
        let planner = PlacementPlanner::default();
        let s = style(PlacementMode::Hop);
        let plan = planner
            .plan(&s, MediaKind::Video, Size::new(640, 360), &[Size::new(50, 20)], 3600.0, 1)
            .unwrap();
        match &plan.layers[0].trajectory {
            PlacementTrajectory::Hop {
                waypoints, repeat, ..
            } => {
                assert_eq!(waypoints.len(), 64);
                assert!(repeat);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_image_forces_static() {
        let planner = PlacementPlanner::default();
        let plan = planner
            .plan(
                &style(PlacementMode::Dual),
                MediaKind::Image,
                Size::new(800, 600),
                &[Size::new(100, 30)],
                0.0,
                1,
            )
            .unwrap();
        assert_eq!(plan.layers.len(), 1);
        assert_eq!(plan.layers[0].motion, LayerMotion::Static);
    }

    #[test]
    fn test_layer_count_mismatch_is_error() {
        let planner = PlacementPlanner::default();
        let err = planner.plan(
            &style(PlacementMode::Dual),
            MediaKind::Video,
            Size::new(800, 600),
            &[Size::new(100, 30)],
            10.0,
            1,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_oversized_mark_is_rejected() {
        let planner = PlacementPlanner::default();
        let err = planner.plan(
            &style(PlacementMode::Static),
            MediaKind::Video,
            Size::new(320, 240),
            &[Size::new(400, 30)],
            10.0,
            1,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_non_finite_speed_rejected() {
        let planner = PlacementPlanner::default();
        let mut s = style(PlacementMode::Lissajous);
        s.speed = f64::NAN;
        let err = planner.plan(
            &s,
            MediaKind::Video,
            Size::new(640, 360),
            &[Size::new(40, 20)],
            10.0,
            1,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_margin_larger_than_free_space_clamps() {
        let planner = PlacementPlanner::default();
        let mut s = style(PlacementMode::Static);
        s.margin = 200;
        let plan = planner
            .plan(&s, MediaKind::Video, Size::new(300, 100), &[Size::new(250, 90)], 5.0, 1)
            .unwrap();
        assert_eq!(
            plan.layers[0].trajectory.position_at(0.0),
            Some(Point::new(0.0, 0.0))
        );
    }

    fn arb_mode() -> impl Strategy<Value = PlacementMode> {
        prop::sample::select(PlacementMode::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn prop_layers_stay_inside_frame(
            mode in arb_mode(),
            fw in 16u32..4000,
            fh in 16u32..4000,
            mw_share in 0.0f64..1.0,
            mh_share in 0.0f64..1.0,
            duration in 0.0f64..20_000.0,
            speed in 0.25f64..4.0,
            window in 1.0f64..60.0,
            margin in 0u32..200,
            seed in any::<u64>(),
            samples in prop::collection::vec(0.0f64..1.0, 1..24),
        ) {
            let frame = Size::new(fw, fh);
            let mark = Size::new(
                ((fw as f64 * mw_share) as u32).max(1),
                ((fh as f64 * mh_share) as u32).max(1),
            );
            let s = StyleSettings {
                mode,
                speed,
                hop_window_secs: window,
                margin,
                ..StyleSettings::default()
            };
            let marks = vec![mark; mode.layers().len()];
            let plan = PlacementPlanner::default()
                .plan(&s, MediaKind::Video, frame, &marks, duration, seed)
                .unwrap();

            let max_x = (fw - mark.width) as f64;
            let max_y = (fh - mark.height) as f64;
            for layer in &plan.layers {
                for frac in &samples {
                    let t = frac * duration;
                    if let Some(p) = layer.trajectory.position_at(t) {
                        prop_assert!(p.x >= 0.0 && p.x <= max_x, "x={} max={}", p.x, max_x);
                        prop_assert!(p.y >= 0.0 && p.y <= max_y, "y={} max={}", p.y, max_y);
                    }
                }
            }
        }
    }
}
