//! Augmentation transforms for in-memory images.
//!
//! Images are `H x W x C` float arrays. The photometric transforms expect
//! float data in the 0..255 range; saturation and hue expect an HSV image
//! (hue in degrees). Colour-space conversion itself is not provided here.
//!
//! ```ignore
//! let pre_process = Compose::new()
//!     .then(Resize::new(224, 224))
//!     .then(RandomMirror)
//!     .then(RandomBrightness::new(32.0)?)
//!     .then(RandomContrast::new(0.5, 1.5)?)
//!     .then(Normalize::new(&[123.7, 116.3, 103.5], &[58.4, 57.1, 57.4])?);
//! let image = pre_process.apply(image, &mut rng)?;
//! ```

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb};
use ndarray::{Array3, Axis, s};
use rand::{Rng, RngCore};
use trainsharp_core::{Result, SharpError};

/// An `H x W x C` float image.
pub type Image = Array3<f32>;

/// Convert an 8-bit image to float without rescaling.
pub fn image_from_u8(image: &Array3<u8>) -> Image {
    image.mapv(f32::from)
}

/// One augmentation step.
pub trait Transform: Send + Sync {
    fn apply(&self, image: Image, rng: &mut dyn RngCore) -> Result<Image>;
}

/// Apply transforms in order.
#[derive(Default)]
pub struct Compose {
    steps: Vec<Box<dyn Transform>>,
}

impl Compose {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, step: impl Transform + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Transform for Compose {
    fn apply(&self, image: Image, rng: &mut dyn RngCore) -> Result<Image> {
        self.steps
            .iter()
            .try_fold(image, |image, step| step.apply(image, rng))
    }
}

fn require_channels(image: &Image, channels: usize, what: &str) -> Result<()> {
    let found = image.len_of(Axis(2));
    if found != channels {
        return Err(SharpError::invalid_argument(format!(
            "{what} expects {channels} channels, got {found}"
        )));
    }
    Ok(())
}

fn check_range(lower: f32, upper: f32, what: &str) -> Result<()> {
    if !(upper >= lower) {
        return Err(SharpError::invalid_argument(format!(
            "{what} upper must be >= lower"
        )));
    }
    if !(lower >= 0.0) {
        return Err(SharpError::invalid_argument(format!(
            "{what} lower must be non-negative"
        )));
    }
    Ok(())
}

/// Bilinear resize of a 3-channel image.
#[derive(Debug, Clone, Copy)]
pub struct Resize {
    pub height: u32,
    pub width: u32,
}

impl Resize {
    pub fn new(height: u32, width: u32) -> Self {
        Self { height, width }
    }
}

impl Transform for Resize {
    fn apply(&self, image: Image, _rng: &mut dyn RngCore) -> Result<Image> {
        require_channels(&image, 3, "resize")?;
        if self.height == 0 || self.width == 0 {
            return Err(SharpError::invalid_argument("resize target must be non-zero"));
        }
        let (h, w, _) = image.dim();
        let raw: Vec<f32> = image.iter().copied().collect();
        let buffer: ImageBuffer<Rgb<f32>, Vec<f32>> =
            ImageBuffer::from_raw(w as u32, h as u32, raw)
                .ok_or_else(|| SharpError::invalid_argument("image buffer size mismatch"))?;
        let resized = imageops::resize(&buffer, self.width, self.height, FilterType::Triangle);
        Array3::from_shape_vec(
            (self.height as usize, self.width as usize, 3),
            resized.into_raw(),
        )
        .map_err(|e| SharpError::invalid_argument(e.to_string()))
    }
}

/// Flip horizontally with probability one half.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomMirror;

impl Transform for RandomMirror {
    fn apply(&self, image: Image, rng: &mut dyn RngCore) -> Result<Image> {
        if rng.gen_bool(0.5) {
            Ok(image.slice(s![.., ..;-1, ..]).to_owned())
        } else {
            Ok(image)
        }
    }
}

/// Add a uniform offset in `[-delta, delta]` with probability one half.
#[derive(Debug, Clone, Copy)]
pub struct RandomBrightness {
    delta: f32,
}

impl RandomBrightness {
    pub fn new(delta: f32) -> Result<Self> {
        if !(0.0..=255.0).contains(&delta) {
            return Err(SharpError::invalid_argument(format!(
                "brightness delta must lie in [0, 255], got {delta}"
            )));
        }
        Ok(Self { delta })
    }
}

impl Transform for RandomBrightness {
    fn apply(&self, mut image: Image, rng: &mut dyn RngCore) -> Result<Image> {
        if rng.gen_bool(0.5) {
            let delta = rng.gen_range(-self.delta..=self.delta);
            image += delta;
        }
        Ok(image)
    }
}

/// Scale every value by a factor in `[lower, upper]` with probability one half.
#[derive(Debug, Clone, Copy)]
pub struct RandomContrast {
    lower: f32,
    upper: f32,
}

impl RandomContrast {
    pub fn new(lower: f32, upper: f32) -> Result<Self> {
        check_range(lower, upper, "contrast")?;
        Ok(Self { lower, upper })
    }
}

impl Transform for RandomContrast {
    fn apply(&self, mut image: Image, rng: &mut dyn RngCore) -> Result<Image> {
        if rng.gen_bool(0.5) {
            let alpha = rng.gen_range(self.lower..=self.upper);
            image *= alpha;
        }
        Ok(image)
    }
}

/// Scale the saturation channel of an HSV image with probability one half.
#[derive(Debug, Clone, Copy)]
pub struct RandomSaturation {
    lower: f32,
    upper: f32,
}

impl RandomSaturation {
    pub fn new(lower: f32, upper: f32) -> Result<Self> {
        check_range(lower, upper, "saturation")?;
        Ok(Self { lower, upper })
    }
}

impl Transform for RandomSaturation {
    fn apply(&self, mut image: Image, rng: &mut dyn RngCore) -> Result<Image> {
        require_channels(&image, 3, "saturation")?;
        if rng.gen_bool(0.5) {
            let factor = rng.gen_range(self.lower..=self.upper);
            image.index_axis_mut(Axis(2), 1).mapv_inplace(|v| v * factor);
        }
        Ok(image)
    }
}

/// Rotate the hue channel (degrees) of an HSV image with probability one half.
#[derive(Debug, Clone, Copy)]
pub struct RandomHue {
    delta: f32,
}

impl RandomHue {
    pub fn new(delta: f32) -> Result<Self> {
        if !(0.0..=360.0).contains(&delta) {
            return Err(SharpError::invalid_argument(format!(
                "hue delta must lie in [0, 360], got {delta}"
            )));
        }
        Ok(Self { delta })
    }
}

impl Default for RandomHue {
    fn default() -> Self {
        Self { delta: 18.0 }
    }
}

impl Transform for RandomHue {
    fn apply(&self, mut image: Image, rng: &mut dyn RngCore) -> Result<Image> {
        require_channels(&image, 3, "hue")?;
        if rng.gen_bool(0.5) {
            let shift = rng.gen_range(-self.delta..=self.delta);
            image.index_axis_mut(Axis(2), 0).mapv_inplace(|h| {
                let h = h + shift;
                if h > 360.0 {
                    h - 360.0
                } else if h < 0.0 {
                    h + 360.0
                } else {
                    h
                }
            });
        }
        Ok(image)
    }
}

/// Per-channel `(x - mean) / std`.
#[derive(Debug, Clone)]
pub struct Normalize {
    mean: Vec<f32>,
    std: Vec<f32>,
}

impl Normalize {
    pub fn new(mean: &[f32], std: &[f32]) -> Result<Self> {
        if mean.len() != std.len() || mean.is_empty() {
            return Err(SharpError::invalid_argument(
                "mean and std must be non-empty and of equal length",
            ));
        }
        if std.iter().any(|s| !(*s > 0.0)) {
            return Err(SharpError::invalid_argument("std entries must be positive"));
        }
        Ok(Self {
            mean: mean.to_vec(),
            std: std.to_vec(),
        })
    }

    /// The transform undoing this one.
    pub fn inverse(&self) -> Denormalize {
        Denormalize {
            mean: self.mean.clone(),
            std: self.std.clone(),
        }
    }
}

impl Transform for Normalize {
    fn apply(&self, mut image: Image, _rng: &mut dyn RngCore) -> Result<Image> {
        require_channels(&image, self.mean.len(), "normalize")?;
        for (c, mut channel) in image.axis_iter_mut(Axis(2)).enumerate() {
            let (mean, std) = (self.mean[c], self.std[c]);
            channel.mapv_inplace(|v| (v - mean) / std);
        }
        Ok(image)
    }
}

/// Per-channel `x * std + mean`, clamped to `[0, 1]`.
#[derive(Debug, Clone)]
pub struct Denormalize {
    mean: Vec<f32>,
    std: Vec<f32>,
}

impl Transform for Denormalize {
    fn apply(&self, mut image: Image, _rng: &mut dyn RngCore) -> Result<Image> {
        require_channels(&image, self.mean.len(), "denormalize")?;
        for (c, mut channel) in image.axis_iter_mut(Axis(2)).enumerate() {
            let (mean, std) = (self.mean[c], self.std[c]);
            channel.mapv_inplace(|v| (v * std + mean).clamp(0.0, 1.0));
        }
        Ok(image)
    }
}
