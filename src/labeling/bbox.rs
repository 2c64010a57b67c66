use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{ImageSize, LabelingData, SubmissionBox};

/// A point in source-image pixel space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A labelled rectangle, top-left anchored, in source-image pixels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBoxLabel {
    pub id: Uuid,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub label: String,
    /// Display color as `#rrggbb`.
    pub color: String,
}

impl BoundingBoxLabel {
    pub fn new(
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        label: impl Into<String>,
        color: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            x,
            y,
            width,
            height,
            label: label.into().trim().to_string(),
            color: color.into(),
        }
    }

    /// Box spanned by a drag gesture in any direction, clipped to the image.
    pub fn from_drag(
        start: Point,
        end: Point,
        image: ImageSize,
        label: impl Into<String>,
        color: impl Into<String>,
    ) -> Self {
        let x = start.x.min(end.x);
        let y = start.y.min(end.y);
        let width = (start.x - end.x).abs();
        let height = (start.y - end.y).abs();
        Self::new(x, y, width, height, label, color).clipped(image)
    }

    /// Intersect with `[0, width] x [0, height]`; a box fully outside collapses to zero area.
    pub fn clipped(mut self, image: ImageSize) -> Self {
        let max_x = f64::from(image.width);
        let max_y = f64::from(image.height);
        let x1 = sanitize(self.x).clamp(0.0, max_x);
        let y1 = sanitize(self.y).clamp(0.0, max_y);
        let x2 = sanitize(self.x + self.width).clamp(0.0, max_x);
        let y2 = sanitize(self.y + self.height).clamp(0.0, max_y);
        self.x = x1;
        self.y = y1;
        self.width = (x2 - x1).max(0.0);
        self.height = (y2 - y1).max(0.0);
        self
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    pub fn to_submission(&self) -> SubmissionBox {
        SubmissionBox {
            x1: self.x,
            y1: self.y,
            x2: self.x + self.width,
            y2: self.y + self.height,
            label: self.label.clone(),
        }
    }
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

/// Convert `{x, y, width, height}` boxes to `{x1, y1, x2, y2, label}`.
pub fn submission_boxes(labels: &[BoundingBoxLabel]) -> Vec<SubmissionBox> {
    labels.iter().map(BoundingBoxLabel::to_submission).collect()
}

/// Build the `labeling_data` payload for an image of the given size.
pub fn labeling_data(labels: &[BoundingBoxLabel], image: ImageSize) -> LabelingData {
    LabelingData {
        boxes: submission_boxes(labels),
        image_width: image.width,
        image_height: image.height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IMAGE: ImageSize = ImageSize {
        width: 800,
        height: 600,
    };

    #[test]
    fn drag_in_any_direction_normalizes_to_top_left() {
        let forward = BoundingBoxLabel::from_drag(
            Point::new(10.0, 20.0),
            Point::new(110.0, 220.0),
            IMAGE,
            "apple",
            "#ff0000",
        );
        let backward = BoundingBoxLabel::from_drag(
            Point::new(110.0, 220.0),
            Point::new(10.0, 20.0),
            IMAGE,
            "apple",
            "#ff0000",
        );
        for label in [&forward, &backward] {
            assert_eq!((label.x, label.y), (10.0, 20.0));
            assert_eq!((label.width, label.height), (100.0, 200.0));
        }
        assert_ne!(forward.id, backward.id);
    }

    #[test]
    fn drag_past_the_edge_is_clipped() {
        let label = BoundingBoxLabel::from_drag(
            Point::new(-50.0, 500.0),
            Point::new(100.0, 900.0),
            IMAGE,
            "bowl",
            "#00ff00",
        );
        assert_eq!((label.x, label.y), (0.0, 500.0));
        assert_eq!((label.width, label.height), (100.0, 100.0));
    }

    #[test]
    fn box_outside_the_image_collapses() {
        let label = BoundingBoxLabel::new(900.0, 700.0, 50.0, 50.0, "cup", "#0000ff").clipped(IMAGE);
        assert!(label.is_degenerate());
        assert_eq!(label.area(), 0.0);
    }

    #[test]
    fn non_finite_coordinates_are_treated_as_origin() {
        let label =
            BoundingBoxLabel::new(f64::NAN, 10.0, 20.0, 20.0, "cup", "#0000ff").clipped(IMAGE);
        assert_eq!(label.x, 0.0);
        assert!(label.width.is_finite());
    }

    #[test]
    fn labels_are_trimmed() {
        let label = BoundingBoxLabel::new(0.0, 0.0, 1.0, 1.0, "  plate ", "#123456");
        assert_eq!(label.label, "plate");
    }

    #[test]
    fn apple_box_converts_to_corner_format() {
        let labels = vec![BoundingBoxLabel::new(
            100.0, 150.0, 200.0, 120.0, "apple", "#ff0000",
        )];
        let data = labeling_data(&labels, IMAGE);
        assert_eq!(data.image_width, 800);
        assert_eq!(data.image_height, 600);
        assert_eq!(
            data.boxes,
            vec![SubmissionBox {
                x1: 100.0,
                y1: 150.0,
                x2: 300.0,
                y2: 270.0,
                label: "apple".into(),
            }]
        );
    }
}
