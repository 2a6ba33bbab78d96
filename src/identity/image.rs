use crate::detect::BBox;

/// Borrowed view of one packed frame (row-major, `channels` bytes per pixel).
///
/// Replays carry no pixels; those frames are built with [`FrameImage::blank`]
/// and every crop taken from them is empty.
#[derive(Clone, Copy, Debug)]
pub struct FrameImage<'a> {
    pixels: &'a [u8],
    width: u32,
    height: u32,
    channels: u32,
}

impl<'a> FrameImage<'a> {
    /// Returns `None` when `pixels` is shorter than the declared geometry.
    pub fn new(pixels: &'a [u8], width: u32, height: u32, channels: u32) -> Option<Self> {
        let needed = width as usize * height as usize * channels as usize;
        if channels == 0 || pixels.len() < needed {
            return None;
        }
        Some(Self {
            pixels,
            width,
            height,
            channels,
        })
    }

    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            pixels: &[],
            width,
            height,
            channels: 0,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn has_pixels(&self) -> bool {
        !self.pixels.is_empty()
    }

    /// Crops to `bbox` after clamping it to the frame.
    pub fn crop(&self, bbox: &BBox) -> Crop<'a> {
        let clamped = bbox.clamp_to(self.width, self.height);
        let x = clamped.left().floor() as u32;
        let y = clamped.top().floor() as u32;
        let right = (clamped.right().ceil() as u32).min(self.width);
        let bottom = (clamped.bottom().ceil() as u32).min(self.height);
        Crop {
            source: *self,
            x,
            y,
            width: right.saturating_sub(x),
            height: bottom.saturating_sub(y),
        }
    }
}

/// Rectangular region of a [`FrameImage`].
#[derive(Clone, Copy, Debug)]
pub struct Crop<'a> {
    source: FrameImage<'a>,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl<'a> Crop<'a> {
    pub fn channels(&self) -> u32 {
        self.source.channels
    }

    pub fn is_empty(&self) -> bool {
        !self.source.has_pixels() || self.width == 0 || self.height == 0
    }

    /// One row of the crop, or `None` past the bottom or for pixel-less frames.
    pub fn row(&self, row: u32) -> Option<&'a [u8]> {
        if self.is_empty() || row >= self.height {
            return None;
        }
        let ch = self.source.channels as usize;
        let stride = self.source.width as usize * ch;
        let start = (self.y + row) as usize * stride + self.x as usize * ch;
        let end = start + self.width as usize * ch;
        self.source.pixels.get(start..end)
    }

    /// Copies the region out as a packed buffer.
    pub fn to_vec(&self) -> Option<Vec<u8>> {
        if self.is_empty() {
            return None;
        }
        let mut out = Vec::with_capacity((self.width * self.height * self.channels()) as usize);
        for row in 0..self.height {
            out.extend_from_slice(self.row(row)?);
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crop_extracts_clamped_region() {
        // 4x3 single-channel frame with pixel value = index
        let pixels: Vec<u8> = (0..12).collect();
        let frame = FrameImage::new(&pixels, 4, 3, 1).unwrap();
        let crop = frame.crop(&BBox::ltrb(1.0, 1.0, 10.0, 10.0));
        assert_eq!((crop.x, crop.y, crop.width, crop.height), (1, 1, 3, 2));
        assert_eq!(crop.to_vec().unwrap(), vec![5, 6, 7, 9, 10, 11]);
    }

    #[test]
    fn blank_frame_yields_empty_crops() {
        let frame = FrameImage::blank(640, 480);
        let crop = frame.crop(&BBox::ltrb(0.0, 0.0, 100.0, 100.0));
        assert!(crop.is_empty());
        assert!(crop.to_vec().is_none());
    }

    #[test]
    fn short_buffer_is_rejected() {
        assert!(FrameImage::new(&[0u8; 10], 4, 3, 1).is_none());
    }
}
