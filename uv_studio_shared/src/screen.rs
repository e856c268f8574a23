// src/screen.rs - screen automation boundary
//
// Implementations own window discovery, template matching and input
// synthesis; the host only passes configuration through.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScreenError {
    #[error("Screen capture failed: {0}")]
    Capture(String),
    #[error("Input synthesis failed: {0}")]
    Input(String),
    #[error("Template asset not found: {0}")]
    MissingTemplate(String),
    #[error("Window management failed: {0}")]
    Window(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Convert a point reported in physical pixels into click coordinates.
    pub fn scaled(self, scale: f64) -> Self {
        Self {
            x: self.x / scale,
            y: self.y / scale,
        }
    }
}

/// Window bounds in click coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self { left, top, width, height }
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    /// A point offset from the window's top-left corner.
    pub fn offset(&self, x: f64, y: f64) -> Point {
        Point::new(self.left + x, self.top + y)
    }

    /// A point offset from the window's top-right corner, `x` measured leftwards.
    pub fn offset_from_right(&self, x: f64, y: f64) -> Point {
        Point::new(self.right() - x, self.top + y)
    }
}

/// An image asset to search for on screen and the match confidence to require.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub name: String,
    pub confidence: f32,
}

impl Template {
    pub fn new(name: impl Into<String>, confidence: f32) -> Self {
        Self {
            name: name.into(),
            confidence,
        }
    }
}

#[async_trait]
pub trait ScreenDriver: Send + Sync {
    /// Locate the first window whose title contains `title`, bring it to the
    /// front and return its bounds.
    async fn find_and_activate_window(&self, title: &str) -> Result<Option<Rect>, ScreenError>;

    /// Center of the best match for `template`, in physical pixels.
    async fn locate_template(&self, template: &Template) -> Result<Option<Point>, ScreenError>;

    async fn poll_for_template(&self, template: &Template) -> Result<bool, ScreenError> {
        Ok(self.locate_template(template).await?.is_some())
    }

    async fn click(&self, point: Point) -> Result<(), ScreenError>;

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_offsets() {
        let rect = Rect::new(100.0, 50.0, 800.0, 600.0);
        assert_eq!(rect.offset(45.0, 45.0), Point::new(145.0, 95.0));
        assert_eq!(rect.offset_from_right(36.0, 360.0), Point::new(864.0, 410.0));
    }

    #[test]
    fn retina_scaling_halves_points() {
        assert_eq!(Point::new(400.0, 220.0).scaled(2.0), Point::new(200.0, 110.0));
        assert_eq!(Point::new(400.0, 220.0).scaled(1.0), Point::new(400.0, 220.0));
    }
}
