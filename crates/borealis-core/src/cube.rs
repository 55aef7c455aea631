use std::path::{Path, PathBuf};

use ndarray::{Array3, ArrayView2, Axis};

use crate::error::{BorealisError, Result};
use crate::io::fits::{self, missing_keyword, Header};

/// A data cube plus its header, the unit every stage operates on.
#[derive(Clone, Debug)]
pub struct Cube {
    /// Pixel data, shape = (frames, height, width).
    pub data: Array3<f32>,
    pub header: Header,
}

impl Cube {
    pub fn open(path: &Path) -> Result<Self> {
        fits::read_fits(path)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fits::write_fits(path, &self.data, &self.header)
    }

    pub fn frame_count(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn height(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    pub fn width(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    pub fn frame(&self, index: usize) -> ArrayView2<'_, f32> {
        self.data.index_axis(Axis(0), index)
    }
}

/// Which readout generation produced a file. Gen2 data carries the FLC
/// state keyword; the original generation does not.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileType {
    Gen2,
    Og,
}

/// Camera index of the dual-camera instrument.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Camera {
    Cam1,
    Cam2,
}

impl Camera {
    pub fn from_index(index: i64) -> Result<Self> {
        match index {
            1 => Ok(Self::Cam1),
            2 => Ok(Self::Cam2),
            other => Err(BorealisError::InvalidCamera(other)),
        }
    }

    pub fn index(self) -> u8 {
        match self {
            Self::Cam1 => 1,
            Self::Cam2 => 2,
        }
    }
}

impl std::fmt::Display for Camera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cam{}", self.index())
    }
}

/// Wollaston beam of a split polarimetric frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Beam {
    Left,
    Right,
}

impl Beam {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            _ => None,
        }
    }
}

/// Identity derived from a file's header, immutable once extracted.
/// Routes files to camera- and revision-specific processing branches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FileInfo {
    pub file_type: FileType,
    pub camera: Camera,
}

impl FileInfo {
    pub fn from_header(path: &Path, header: &Header) -> Result<Self> {
        let file_type = if header.contains("U_FLCSTT") {
            FileType::Gen2
        } else {
            FileType::Og
        };
        let camera_index = header
            .int("U_CAMERA")
            .ok_or_else(|| missing_keyword(path, "U_CAMERA"))?;
        Ok(Self {
            file_type,
            camera: Camera::from_index(camera_index)?,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let header = fits::read_header(path)?;
        Self::from_header(path, &header)
    }
}

/// A file moving through the pipeline: its current on-disk path plus the
/// identity extracted when the raw file was first seen. Stages replace the
/// path with their output path; the identity never changes.
#[derive(Clone, Debug)]
pub struct FileRecord {
    pub path: PathBuf,
    pub info: FileInfo,
    pub beam: Option<Beam>,
}

impl FileRecord {
    pub fn new(path: PathBuf) -> Result<Self> {
        let header = fits::read_header(&path)?;
        let info = FileInfo::from_header(&path, &header)?;
        // files from an earlier beam-split run keep their beam identity
        let beam = header.string("BEAM").and_then(Beam::from_str);
        Ok(Self { path, info, beam })
    }

    pub fn with_path(&self, path: PathBuf) -> Self {
        Self {
            path,
            info: self.info,
            beam: self.beam,
        }
    }

    pub fn with_beam(&self, path: PathBuf, beam: Beam) -> Self {
        Self {
            path,
            info: self.info,
            beam: Some(beam),
        }
    }
}
