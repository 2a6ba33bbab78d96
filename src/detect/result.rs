use serde::{Deserialize, Serialize};

/// Axis-aligned box in left-top-right-bottom pixel coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BBox(pub [f32; 4]);

impl BBox {
    #[inline]
    pub fn ltrb(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        BBox([x1, y1, x2, y2])
    }

    #[inline(always)]
    pub fn left(&self) -> f32 {
        self.0[0]
    }

    #[inline(always)]
    pub fn top(&self) -> f32 {
        self.0[1]
    }

    #[inline(always)]
    pub fn right(&self) -> f32 {
        self.0[2]
    }

    #[inline(always)]
    pub fn bottom(&self) -> f32 {
        self.0[3]
    }

    #[inline]
    pub fn width(&self) -> f32 {
        (self.right() - self.left()).max(0.0)
    }

    #[inline]
    pub fn height(&self) -> f32 {
        (self.bottom() - self.top()).max(0.0)
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Vertical centre, the coordinate the line-crossing test runs on.
    #[inline]
    pub fn centroid_y(&self) -> f32 {
        (self.top() + self.bottom()) / 2.0
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }

    /// True when the box encloses no area.
    #[inline]
    pub fn is_degenerate(&self) -> bool {
        !(self.right() > self.left() && self.bottom() > self.top())
    }

    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let (w, h) = (width as f32, height as f32);
        BBox([
            self.left().clamp(0.0, w),
            self.top().clamp(0.0, h),
            self.right().clamp(0.0, w),
            self.bottom().clamp(0.0, h),
        ])
    }

    /// Intersection over union; 0 for disjoint or degenerate boxes.
    pub fn iou(&self, other: &BBox) -> f32 {
        let i_left = self.left().max(other.left());
        let i_top = self.top().max(other.top());
        let i_right = self.right().min(other.right());
        let i_bottom = self.bottom().min(other.bottom());

        let inter = (i_right - i_left).max(0.0) * (i_bottom - i_top).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            return 0.0;
        }
        inter / union
    }
}

impl From<[f32; 4]> for BBox {
    fn from(v: [f32; 4]) -> Self {
        BBox(v)
    }
}

/// One detector output for one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BBox,
    /// Detector confidence in 0..=1.
    pub confidence: f32,
    #[serde(default)]
    pub label: String,
}

impl Detection {
    pub fn new(bbox: impl Into<BBox>, confidence: f32, label: &str) -> Self {
        Self {
            bbox: bbox.into(),
            confidence,
            label: label.to_string(),
        }
    }
}
