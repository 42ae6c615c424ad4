//! Pixel geometry primitives.

use serde::{Deserialize, Serialize};

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// The shorter of the two sides.
    pub fn short_side(&self) -> u32 {
        self.width.min(self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether `inner` fits entirely inside this size.
    pub fn contains(&self, inner: Size) -> bool {
        inner.width <= self.width && inner.height <= self.height
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A position in output pixels (top-left corner of a layer).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Round down to the nearest even number, minimum 2.
///
/// yuv420p requires even frame dimensions.
pub fn even_floor(value: u32) -> u32 {
    (value & !1).max(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_contains() {
        let frame = Size::new(1280, 720);
        assert!(frame.contains(Size::new(1280, 720)));
        assert!(!frame.contains(Size::new(1281, 10)));
        assert_eq!(frame.short_side(), 720);
        assert_eq!(frame.to_string(), "1280x720");
    }

    #[test]
    fn test_even_floor() {
        assert_eq!(even_floor(721), 720);
        assert_eq!(even_floor(720), 720);
        assert_eq!(even_floor(1), 2);
        assert_eq!(even_floor(0), 2);
    }
}
