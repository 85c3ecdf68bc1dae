use crate::error::{KernelError, SourceError};
use ndarray::{Array2, ArrayD, Axis, Ix2};
use std::time::SystemTime;

/// A single intensity image handed from a frame source to the detection kernel.
///
/// Pixels are stored row-major in standard layout so the kernel can walk rows
/// as contiguous slices.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame identifier assigned by the producing source
    pub id: u64,
    /// Timestamp when the frame was captured or decoded
    pub timestamp: SystemTime,
    pixels: Array2<f32>,
}

impl Frame {
    /// Create a frame from a 2-D intensity grid
    pub fn new(id: u64, timestamp: SystemTime, pixels: Array2<f32>) -> Self {
        let pixels = if pixels.is_standard_layout() {
            pixels
        } else {
            pixels.as_standard_layout().into_owned()
        };

        Self {
            id,
            timestamp,
            pixels,
        }
    }

    /// Build a frame from an 8-bit grayscale buffer (`width * height` bytes)
    pub fn from_luma8(
        id: u64,
        timestamp: SystemTime,
        width: u32,
        height: u32,
        data: &[u8],
    ) -> Result<Self, SourceError> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(SourceError::MalformedBuffer {
                details: format!(
                    "expected {} bytes for {}x{} GRAY8, got {}",
                    expected,
                    width,
                    height,
                    data.len()
                ),
            });
        }

        let pixels = Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
            data[y * width as usize + x] as f32
        });

        Ok(Self::new(id, timestamp, pixels))
    }

    /// Build a frame from a raw buffer of arbitrary dimensionality.
    ///
    /// 2-D buffers are taken as-is. 3-D buffers (`rows x cols x channels`) are
    /// collapsed to grayscale by averaging over the channel axis.
    pub fn from_buffer(
        id: u64,
        timestamp: SystemTime,
        buffer: ArrayD<f32>,
    ) -> Result<Self, KernelError> {
        match buffer.ndim() {
            2 => {
                let pixels = buffer
                    .into_dimensionality::<Ix2>()
                    .map_err(|_| KernelError::Dimensionality { ndim: 2 })?;
                Ok(Self::new(id, timestamp, pixels))
            }
            3 => {
                if buffer.len_of(Axis(2)) == 0 {
                    return Err(KernelError::EmptyFrame);
                }
                let pixels = buffer
                    .mean_axis(Axis(2))
                    .ok_or(KernelError::EmptyFrame)?
                    .into_dimensionality::<Ix2>()
                    .map_err(|_| KernelError::Dimensionality { ndim: 3 })?;
                Ok(Self::new(id, timestamp, pixels))
            }
            ndim => Err(KernelError::Dimensionality { ndim }),
        }
    }

    /// Frame dimensions as `(rows, cols)`
    pub fn shape(&self) -> (usize, usize) {
        self.pixels.dim()
    }

    pub fn rows(&self) -> usize {
        self.pixels.nrows()
    }

    pub fn cols(&self) -> usize {
        self.pixels.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn pixels(&self) -> &Array2<f32> {
        &self.pixels
    }

    /// Row-major view of the samples
    pub(crate) fn samples(&self) -> &[f32] {
        // Standard layout is established in `new`
        self.pixels.as_slice().unwrap_or(&[])
    }
}
