use opencv::core::{Rect, Scalar};
use serde::{Serialize, Serializer};
use std::fmt;

/// Classes in the order of the model's output vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FreshnessLabel {
    Damaged,
    Old,
    Ripe,
    Unripe,
}

impl FreshnessLabel {
    pub const ALL: [FreshnessLabel; 4] = [
        FreshnessLabel::Damaged,
        FreshnessLabel::Old,
        FreshnessLabel::Ripe,
        FreshnessLabel::Unripe,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FreshnessLabel::Damaged => "Damaged",
            FreshnessLabel::Old => "Old",
            FreshnessLabel::Ripe => "Ripe",
            FreshnessLabel::Unripe => "Unripe",
        }
    }

    /// Box color in BGR.
    pub fn color(&self) -> Scalar {
        match self {
            FreshnessLabel::Ripe => Scalar::new(0.0, 255.0, 0.0, 0.0),
            FreshnessLabel::Unripe => Scalar::new(0.0, 165.0, 255.0, 0.0),
            FreshnessLabel::Old => Scalar::new(0.0, 140.0, 255.0, 0.0),
            FreshnessLabel::Damaged => Scalar::new(0.0, 0.0, 255.0, 0.0),
        }
    }
}

impl fmt::Display for FreshnessLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Axis-aligned rectangle in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Region {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn meets_minimum(&self, min_size: i32) -> bool {
        self.width >= min_size && self.height >= min_size
    }

    /// Intersection with a `width` x `height` image.
    pub fn clamp_to(&self, width: i32, height: i32) -> Region {
        let x = self.x.clamp(0, width);
        let y = self.y.clamp(0, height);
        let right = (self.x + self.width).clamp(x, width);
        let bottom = (self.y + self.height).clamp(y, height);
        Region::new(x, y, right - x, bottom - y)
    }

    pub fn to_rect(self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }
}

impl From<Rect> for Region {
    fn from(rect: Rect) -> Self {
        Region::new(rect.x, rect.y, rect.width, rect.height)
    }
}

impl Serialize for Region {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        [self.x, self.y, self.width, self.height].serialize(serializer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Detection {
    pub label: FreshnessLabel,
    pub confidence: f32,
    pub bbox: Region,
}

impl Detection {
    pub fn caption(&self) -> String {
        format!("{} ({:.1}%)", self.label, self.confidence * 100.0)
    }
}
