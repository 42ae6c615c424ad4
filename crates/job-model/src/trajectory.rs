//! Placement trajectories.
//!
//! A trajectory maps output time `t` (seconds) to the top-left corner of a
//! watermark layer. Every variant is fully resolved against a frame and
//! mark size, so evaluating or rendering it needs no further context.

use serde::{Deserialize, Serialize};

use inkmark_common::error::{InkmarkError, InkmarkResult};

use crate::geometry::{Point, Size};
use crate::style::LayerMotion;

/// Position of one layer over time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlacementTrajectory {
    /// Fixed position.
    Static { x: f64, y: f64 },

    /// Left-to-right sweep across `[0, span]` repeating every `period_secs`.
    Slide { period_secs: f64, span: f64, y: f64 },

    /// One waypoint per window; waypoint `i` is visible during
    /// `[i*window, (i+1)*window)`. With `repeat`, the set cycles.
    Hop {
        waypoints: Vec<Point>,
        window_secs: f64,
        repeat: bool,
    },

    /// `center + amplitude * (sin(t*speed), cos(t*speed*ratio))`.
    Lissajous {
        center: Point,
        amplitude: Point,
        speed: f64,
        ratio: f64,
    },
}

impl PlacementTrajectory {
    /// Position at time `t`, or `None` when the layer is hidden.
    pub fn position_at(&self, t: f64) -> Option<Point> {
        if !t.is_finite() || t < 0.0 {
            return None;
        }
        match self {
            PlacementTrajectory::Static { x, y } => Some(Point::new(*x, *y)),
            PlacementTrajectory::Slide {
                period_secs,
                span,
                y,
            } => {
                let phase = t.rem_euclid(*period_secs) / period_secs;
                Some(Point::new((span * phase).min(*span).max(0.0), *y))
            }
            PlacementTrajectory::Hop { waypoints, .. } => {
                self.active_waypoint(t).map(|idx| waypoints[idx])
            }
            PlacementTrajectory::Lissajous {
                center,
                amplitude,
                speed,
                ratio,
            } => {
                let x = center.x + amplitude.x * (t * speed).sin();
                let y = center.y + amplitude.y * (t * speed * ratio).cos();
                Some(Point::new(
                    x.min(center.x + amplitude.x).max(center.x - amplitude.x),
                    y.min(center.y + amplitude.y).max(center.y - amplitude.y),
                ))
            }
        }
    }

    /// Index of the Hop waypoint visible at `t`.
    pub fn active_waypoint(&self, t: f64) -> Option<usize> {
        let PlacementTrajectory::Hop {
            waypoints,
            window_secs,
            repeat,
        } = self
        else {
            return None;
        };
        if waypoints.is_empty() || !t.is_finite() || t < 0.0 {
            return None;
        }
        let slot = (t / window_secs).floor() as usize;
        if *repeat {
            Some(slot % waypoints.len())
        } else if slot < waypoints.len() {
            Some(slot)
        } else {
            None
        }
    }

    /// Half-open visibility window `[start, end)` of Hop waypoint `idx`
    /// within one cycle.
    pub fn hop_window(&self, idx: usize) -> Option<(f64, f64)> {
        match self {
            PlacementTrajectory::Hop {
                waypoints,
                window_secs,
                ..
            } if idx < waypoints.len() => {
                let start = idx as f64 * window_secs;
                Some((start, start + window_secs))
            }
            _ => None,
        }
    }

    /// Check that the trajectory is finite and keeps a `mark`-sized layer
    /// inside `frame` for every `t`.
    pub fn validate(&self, frame: Size, mark: Size) -> InkmarkResult<()> {
        let max_x = frame.width as f64 - mark.width as f64;
        let max_y = frame.height as f64 - mark.height as f64;
        if max_x < 0.0 || max_y < 0.0 {
            return Err(InkmarkError::render(format!(
                "watermark {mark} does not fit frame {frame}"
            )));
        }
        let inside = |p: Point| {
            p.is_finite() && p.x >= 0.0 && p.y >= 0.0 && p.x <= max_x && p.y <= max_y
        };
        let ok = match self {
            PlacementTrajectory::Static { x, y } => inside(Point::new(*x, *y)),
            PlacementTrajectory::Slide {
                period_secs,
                span,
                y,
            } => {
                period_secs.is_finite()
                    && *period_secs > 0.0
                    && inside(Point::new(0.0, *y))
                    && inside(Point::new(*span, *y))
            }
            PlacementTrajectory::Hop {
                waypoints,
                window_secs,
                ..
            } => {
                window_secs.is_finite()
                    && *window_secs > 0.0
                    && !waypoints.is_empty()
                    && waypoints.iter().copied().all(inside)
            }
            PlacementTrajectory::Lissajous {
                center,
                amplitude,
                speed,
                ratio,
            } => {
                speed.is_finite()
                    && ratio.is_finite()
                    && amplitude.x >= 0.0
                    && amplitude.y >= 0.0
                    && inside(Point::new(center.x - amplitude.x, center.y - amplitude.y))
                    && inside(Point::new(center.x + amplitude.x, center.y + amplitude.y))
            }
        };
        if ok {
            Ok(())
        } else {
            Err(InkmarkError::render(format!(
                "trajectory leaves frame {frame} for mark {mark}: {self:?}"
            )))
        }
    }
}

/// One watermark layer: which raster, how it moves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub motion: LayerMotion,
    pub mark: Size,
    pub trajectory: PlacementTrajectory,
}

/// All layers for one job, bottom first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementPlan {
    pub frame: Size,
    pub duration_secs: f64,
    pub layers: Vec<Placement>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hop(n: usize, window: f64, repeat: bool) -> PlacementTrajectory {
        PlacementTrajectory::Hop {
            waypoints: (0..n).map(|i| Point::new(i as f64, i as f64)).collect(),
            window_secs: window,
            repeat,
        }
    }

    #[test]
    fn test_hop_windows_are_half_open() {
        let traj = hop(3, 10.0, false);
        assert_eq!(traj.active_waypoint(0.0), Some(0));
        assert_eq!(traj.active_waypoint(9.999), Some(0));
        assert_eq!(traj.active_waypoint(10.0), Some(1));
        assert_eq!(traj.active_waypoint(24.9), Some(2));
        assert_eq!(traj.active_waypoint(30.0), None);
        assert_eq!(traj.hop_window(2), Some((20.0, 30.0)));
        assert_eq!(traj.hop_window(3), None);
    }

    #[test]
    fn test_hop_repeat_cycles() {
        let traj = hop(2, 5.0, true);
        assert_eq!(traj.active_waypoint(12.0), Some(0));
        assert_eq!(traj.active_waypoint(17.0), Some(1));
    }

    #[test]
    fn test_slide_wraps() {
        let traj = PlacementTrajectory::Slide {
            period_secs: 10.0,
            span: 100.0,
            y: 5.0,
        };
        assert_eq!(traj.position_at(0.0), Some(Point::new(0.0, 5.0)));
        assert_eq!(traj.position_at(5.0), Some(Point::new(50.0, 5.0)));
        assert_eq!(traj.position_at(15.0), Some(Point::new(50.0, 5.0)));
        assert_eq!(traj.position_at(-1.0), None);
    }

    #[test]
    fn test_validate_rejects_out_of_frame() {
        let frame = Size::new(100, 100);
        let mark = Size::new(20, 10);
        assert!(PlacementTrajectory::Static { x: 80.0, y: 90.0 }
            .validate(frame, mark)
            .is_ok());
        assert!(PlacementTrajectory::Static { x: 81.0, y: 0.0 }
            .validate(frame, mark)
            .is_err());
        assert!(PlacementTrajectory::Lissajous {
            center: Point::new(40.0, 45.0),
            amplitude: Point::new(40.0, 45.0),
            speed: f64::INFINITY,
            ratio: 2.2,
        }
        .validate(frame, mark)
        .is_err());
        assert!(PlacementTrajectory::Static { x: 0.0, y: 0.0 }
            .validate(frame, Size::new(101, 1))
            .is_err());
    }
}
