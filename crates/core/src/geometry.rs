use serde::{Deserialize, Serialize};

/// Axis-aligned box in image pixel coordinates.
///
/// `(x1, y1)` is the top-left corner, `(x2, y2)` the bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Euclidean distance between the centers of two boxes.
    pub fn center_distance(&self, other: &BoundingBox) -> f32 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }

    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        x >= self.x1 && x <= self.x2 && y >= self.y1 && y <= self.y2
    }

    /// Translate the box by a fixed offset (used to map region-crop
    /// coordinates back into full-image space).
    pub fn offset(&self, dx: f32, dy: f32) -> BoundingBox {
        BoundingBox::new(self.x1 + dx, self.y1 + dy, self.x2 + dx, self.y2 + dy)
    }
}

/// Direction a spatial rule is allowed to search in, relative to the
/// keyword's box center.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchDirection {
    HorizontalRight,
    HorizontalLeft,
    VerticalAbove,
    VerticalBelow,
}

impl SearchDirection {
    /// Whether `candidate` lies in this direction from `keyword`.
    /// Candidates on the exact same axis value are excluded.
    pub fn admits(&self, keyword: &BoundingBox, candidate: &BoundingBox) -> bool {
        let (kx, ky) = keyword.center();
        let (cx, cy) = candidate.center();
        match self {
            SearchDirection::HorizontalRight => cx > kx,
            SearchDirection::HorizontalLeft => cx < kx,
            SearchDirection::VerticalAbove => cy < ky,
            SearchDirection::VerticalBelow => cy > ky,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_and_distance() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(30.0, 0.0, 40.0, 10.0);
        assert_eq!(a.center(), (5.0, 5.0));
        assert_eq!(a.center_distance(&b), 30.0);
    }

    #[test]
    fn direction_right_excludes_left_and_same_column() {
        let kw = BoundingBox::new(100.0, 100.0, 200.0, 120.0);
        let right = BoundingBox::new(250.0, 100.0, 350.0, 120.0);
        let left = BoundingBox::new(0.0, 100.0, 90.0, 120.0);
        assert!(SearchDirection::HorizontalRight.admits(&kw, &right));
        assert!(!SearchDirection::HorizontalRight.admits(&kw, &left));
        assert!(!SearchDirection::HorizontalRight.admits(&kw, &kw));
    }

    #[test]
    fn direction_below_uses_y_axis() {
        let kw = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let below = BoundingBox::new(0.0, 50.0, 10.0, 60.0);
        assert!(SearchDirection::VerticalBelow.admits(&kw, &below));
        assert!(!SearchDirection::VerticalAbove.admits(&kw, &below));
    }

    #[test]
    fn offset_translates_all_corners() {
        let b = BoundingBox::new(1.0, 2.0, 3.0, 4.0).offset(10.0, 20.0);
        assert_eq!(b, BoundingBox::new(11.0, 22.0, 13.0, 24.0));
    }
}
