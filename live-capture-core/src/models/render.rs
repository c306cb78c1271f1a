use std::fmt;

use serde::{Deserialize, Serialize};

/// Quarter-turn rotation applied to a draw or to the encoder output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn degrees(self) -> u16 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    /// Whether width and height swap under this rotation.
    pub fn is_portrait(self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }

    /// Rotation the render thread applies to the camera texture so that a
    /// stream rotated by `self` comes out upright.
    pub fn camera_texture_rotation(self) -> Rotation {
        match self {
            Self::Deg0 => Self::Deg270,
            Self::Deg90 => Self::Deg0,
            Self::Deg180 => Self::Deg90,
            Self::Deg270 => Self::Deg180,
        }
    }
}

impl TryFrom<u16> for Rotation {
    type Error = String;

    fn try_from(degrees: u16) -> Result<Self, Self::Error> {
        match degrees {
            0 => Ok(Self::Deg0),
            90 => Ok(Self::Deg90),
            180 => Ok(Self::Deg180),
            270 => Ok(Self::Deg270),
            other => Err(format!("unsupported rotation: {}", other)),
        }
    }
}

impl From<Rotation> for u16 {
    fn from(rotation: Rotation) -> Self {
        rotation.degrees()
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// Per-binding render settings.
///
/// The preview and encoder bindings each own one; changing one never affects
/// the other's next draw. `fps == 0` means unthrottled; the preview budget
/// always stays at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderBudget {
    pub fps: u32,
    pub rotation: Rotation,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
    pub muted: bool,
}

/// Which drawable a GPU call is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderTarget {
    Preview,
    Encoder,
}

/// Fully resolved parameters for a single draw call.
///
/// Built once per draw from a snapshot of the binding's config, so a draw
/// sees either the old or the new settings, never a mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawParams {
    pub width: u32,
    pub height: u32,
    pub rotation: Rotation,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
    /// Draw a blank frame instead of camera content.
    pub blank: bool,
}

impl DrawParams {
    pub fn from_budget(width: u32, height: u32, budget: &RenderBudget) -> Self {
        Self {
            width,
            height,
            rotation: budget.rotation,
            flip_horizontal: budget.flip_horizontal,
            flip_vertical: budget.flip_vertical,
            blank: budget.muted,
        }
    }
}

/// Opaque handle to the encoder's input surface.
///
/// Produced by a [`VideoEncoder`](crate::VideoEncoder) and consumed by either
/// the GPU context or the camera; the core never dereferences it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EncoderSurface {
    pub id: u64,
    pub width: u32,
    pub height: u32,
}

impl EncoderSurface {
    pub fn new(id: u64, width: u32, height: u32) -> Self {
        Self { id, width, height }
    }
}

/// RGBA still image read back from a render target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StillImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Frame counters maintained by the render thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub preview_frames: u64,
    pub encoder_frames: u64,
    pub skipped_encoder_frames: u64,
}
