//! Geometry primitives shared by the layout engine and the platform layer.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub origin: Point,
    pub size: Size,
}

/// Per-edge insets applied around a tiling area.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Padding {
    #[serde(default)]
    pub top: f64,
    #[serde(default)]
    pub bottom: f64,
    #[serde(default)]
    pub left: f64,
    #[serde(default)]
    pub right: f64,
}

impl Padding {
    pub fn uniform(v: f64) -> Self {
        Padding { top: v, bottom: v, left: v, right: v }
    }
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Size { width, height }
    }
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Rect {
            origin: Point::new(x, y),
            size: Size::new(width, height),
        }
    }

    pub fn min(&self) -> Point {
        self.origin
    }

    pub fn max(&self) -> Point {
        Point::new(
            self.origin.x + self.size.width,
            self.origin.y + self.size.height,
        )
    }

    pub fn center(&self) -> Point {
        Point::new(
            self.origin.x + self.size.width / 2.0,
            self.origin.y + self.size.height / 2.0,
        )
    }

    pub fn area(&self) -> f64 {
        self.size.width * self.size.height
    }

    pub fn contains(&self, point: Point) -> bool {
        (self.min().x..=self.max().x).contains(&point.x)
            && (self.min().y..=self.max().y).contains(&point.y)
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.min().x < other.max().x
            && other.min().x < self.max().x
            && self.min().y < other.max().y
            && other.min().y < self.max().y
    }

    pub fn intersection(&self, other: &Rect) -> Rect {
        let min_x = f64::max(self.min().x, other.min().x);
        let max_x = f64::min(self.max().x, other.max().x);
        let min_y = f64::max(self.min().y, other.min().y);
        let max_y = f64::min(self.max().y, other.max().y);
        Rect {
            origin: Point::new(min_x, min_y),
            size: Size::new(f64::max(max_x - min_x, 0.), f64::max(max_y - min_y, 0.)),
        }
    }

    pub fn union(&self, other: &Rect) -> Rect {
        let min_x = f64::min(self.min().x, other.min().x);
        let max_x = f64::max(self.max().x, other.max().x);
        let min_y = f64::min(self.min().y, other.min().y);
        let max_y = f64::max(self.max().y, other.max().y);
        Rect {
            origin: Point::new(min_x, min_y),
            size: Size::new(max_x - min_x, max_y - min_y),
        }
    }

    pub fn inset(&self, padding: Padding) -> Rect {
        Rect {
            origin: Point::new(self.origin.x + padding.left, self.origin.y + padding.top),
            size: Size::new(
                f64::max(self.size.width - padding.left - padding.right, 0.),
                f64::max(self.size.height - padding.top - padding.bottom, 0.),
            ),
        }
    }
}

pub trait Round {
    fn round(&self) -> Self;
}

impl Round for Point {
    fn round(&self) -> Self {
        Point::new(self.x.round(), self.y.round())
    }
}

impl Round for Rect {
    fn round(&self) -> Self {
        let min = self.min().round();
        let max = self.max().round();
        Rect {
            origin: min,
            size: Size::new(max.x - min.x, max.y - min.y),
        }
    }
}

pub trait IsWithin {
    fn is_within(&self, how_much: f64, other: Self) -> bool;
}

impl IsWithin for f64 {
    fn is_within(&self, how_much: f64, other: Self) -> bool {
        (self - other).abs() < how_much
    }
}

impl IsWithin for Point {
    fn is_within(&self, how_much: f64, other: Self) -> bool {
        self.x.is_within(how_much, other.x) && self.y.is_within(how_much, other.y)
    }
}

impl IsWithin for Size {
    fn is_within(&self, how_much: f64, other: Self) -> bool {
        self.width.is_within(how_much, other.width)
            && self.height.is_within(how_much, other.height)
    }
}

impl IsWithin for Rect {
    fn is_within(&self, how_much: f64, other: Self) -> bool {
        self.origin.is_within(how_much, other.origin) && self.size.is_within(how_much, other.size)
    }
}

pub trait SameAs: IsWithin + Sized {
    fn same_as(&self, other: Self) -> bool {
        self.is_within(0.1, other)
    }
}

impl SameAs for Point {}
impl SameAs for Size {}
impl SameAs for Rect {}

#[cfg(target_os = "macos")]
mod platform {
    use objc2_core_foundation::{CGPoint, CGRect, CGSize};

    use super::{Point, Rect, Size};

    impl From<CGPoint> for Point {
        fn from(p: CGPoint) -> Self {
            Point::new(p.x, p.y)
        }
    }

    impl From<Point> for CGPoint {
        fn from(p: Point) -> Self {
            CGPoint::new(p.x, p.y)
        }
    }

    impl From<CGSize> for Size {
        fn from(s: CGSize) -> Self {
            Size::new(s.width, s.height)
        }
    }

    impl From<Size> for CGSize {
        fn from(s: Size) -> Self {
            CGSize::new(s.width, s.height)
        }
    }

    impl From<CGRect> for Rect {
        fn from(r: CGRect) -> Self {
            Rect {
                origin: r.origin.into(),
                size: r.size.into(),
            }
        }
    }

    impl From<Rect> for CGRect {
        fn from(r: Rect) -> Self {
            CGRect::new(r.origin.into(), r.size.into())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn platform_rect_round_trip_is_identity() {
            let rect = Rect::new(10.5, 20.25, 300.0, 400.75);
            let back: Rect = CGRect::from(rect).into();
            assert_eq!(back, rect);

            let point = Point::new(-3.5, 7.0);
            let back: Point = CGPoint::from(point).into();
            assert_eq!(back, point);

            let size = Size::new(0.0, 12.125);
            let back: Size = CGSize::from(size).into();
            assert_eq!(back, size);
        }
    }
}
