use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::api::{ImagePayload, ImageSize};

#[derive(Debug, Error)]
pub enum EditingImageError {
    #[error("Failed to read image dimensions from {path}: {source}")]
    Dimensions {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("Image {path} has zero width or height")]
    Empty { path: PathBuf },
}

/// The source image currently being labelled.
#[derive(Clone, Debug, PartialEq)]
pub struct EditingImage {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

impl EditingImage {
    /// Read dimensions from the file header without decoding pixels.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EditingImageError> {
        let path = path.as_ref().to_path_buf();
        let (width, height) =
            image::image_dimensions(&path).map_err(|source| EditingImageError::Dimensions {
                path: path.clone(),
                source,
            })?;
        if width == 0 || height == 0 {
            return Err(EditingImageError::Empty { path });
        }
        Ok(Self {
            path,
            width,
            height,
        })
    }

    pub fn size(&self) -> ImageSize {
        ImageSize {
            width: self.width,
            height: self.height,
        }
    }

    pub fn payload(&self) -> std::io::Result<ImagePayload> {
        ImagePayload::from_path(&self.path)
    }
}
