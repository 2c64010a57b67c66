//! Label-editing session model.
//!
//! Boxes are drawn over a source image in its own pixel space, clipped to the
//! image bounds, and converted to the corner format the backend expects when
//! the session is submitted.

mod bbox;
mod editing_image;
mod palette;

pub use bbox::{BoundingBoxLabel, Point, submission_boxes, labeling_data};
pub use editing_image::{EditingImage, EditingImageError};
pub use palette::LabelPalette;
