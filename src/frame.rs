//! Dense RGB frame container.
//!
//! Frames are produced by the ingestion layer and consumed read-only by the
//! difference scorer. Width and height are fixed for the lifetime of a
//! capture session; the pixel buffer is row-major, 3 bytes per pixel.

use anyhow::{anyhow, Result};

/// Samples per pixel.
pub const CHANNELS: usize = 3;

#[derive(Clone, Debug)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    data: Vec<u8>,
}

impl Frame {
    /// Wrap a raw pixel buffer. The buffer length must match the geometry.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(anyhow!(
                "frame buffer length {} does not match {}x{} RGB ({} bytes)",
                data.len(),
                width,
                height,
                expected
            ));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// A frame with every sample set to `value`.
    pub fn filled(width: u32, height: u32, value: u8) -> Self {
        let len = width as usize * height as usize * CHANNELS;
        Self {
            width,
            height,
            data: vec![value; len],
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Paint an axis-aligned rectangle. Clipped to the frame bounds.
    pub fn fill_rect(&mut self, x0: u32, y0: u32, w: u32, h: u32, rgb: [u8; CHANNELS]) {
        let x1 = x0.saturating_add(w).min(self.width);
        let y1 = y0.saturating_add(h).min(self.height);
        for y in y0..y1 {
            for x in x0..x1 {
                let i = (y as usize * self.width as usize + x as usize) * CHANNELS;
                self.data[i..i + CHANNELS].copy_from_slice(&rgb);
            }
        }
    }
}
