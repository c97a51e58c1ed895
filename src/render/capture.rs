use crate::assets::{EntryId, Screenshot};
use std::io::Cursor;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("canvas is empty")]
    EmptyCanvas,
    #[error("failed to map readback buffer: {0}")]
    Map(#[from] wgpu::BufferAsyncError),
    #[error("device poll failed: {0}")]
    Poll(#[from] wgpu::PollError),
    #[error("readback callback was dropped")]
    Disconnected,
    #[error("failed to encode PNG: {0}")]
    Encode(#[from] image::ImageError),
    #[error("pixel buffer does not match {width}x{height}")]
    SizeMismatch { width: u32, height: u32 },
}

/// Decides when the displayed model should be captured.
///
/// A capture fires when one is explicitly requested, or once the view has been still for
/// `settle_frames` consecutive frames after a change.
#[derive(Debug, Clone)]
pub struct CaptureScheduler {
    settle_frames: u32,
    still_frames: u32,
    dirty: bool,
    requested: bool,
}

impl CaptureScheduler {
    pub fn new(settle_frames: u32) -> Self {
        Self {
            settle_frames: settle_frames.max(1),
            still_frames: 0,
            dirty: false,
            requested: false,
        }
    }

    /// The view changed; capture again once it settles.
    pub fn arm(&mut self) {
        self.dirty = true;
        self.still_frames = 0;
    }

    pub fn request(&mut self) {
        self.requested = true;
    }

    pub fn is_pending(&self) -> bool {
        self.dirty || self.requested
    }

    /// Called once per drawn frame. Returns the entry to capture from this frame, if any.
    pub fn poll(&mut self, displayed: Option<EntryId>, moving: bool) -> Option<EntryId> {
        if moving {
            self.arm();
            return None;
        }
        self.still_frames = self.still_frames.saturating_add(1);
        let entry = displayed?;
        let settled = self.dirty && self.still_frames >= self.settle_frames;
        if !settled && !self.requested {
            return None;
        }
        self.dirty = false;
        self.requested = false;
        Some(entry)
    }
}

/// Copy an RGBA8 texture into CPU memory, stripping row padding.
pub fn read_texture_rgba(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
) -> Result<Vec<u8>, CaptureError> {
    let wgpu::Extent3d { width, height, .. } = texture.size();
    if width == 0 || height == 0 {
        return Err(CaptureError::EmptyCanvas);
    }
    let bytes_per_pixel = 4u32;
    let unpadded_bytes_per_row = width * bytes_per_pixel;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(align) * align;

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("canvas readback"),
        size: (padded_bytes_per_row * height) as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("canvas readback"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device.poll(wgpu::PollType::wait_indefinitely())?;
    rx.recv().map_err(|_| CaptureError::Disconnected)??;

    let mapped = slice.get_mapped_range();
    let mut pixels = Vec::with_capacity((unpadded_bytes_per_row * height) as usize);
    for row in 0..height {
        let start = (row * padded_bytes_per_row) as usize;
        pixels.extend_from_slice(&mapped[start..start + unpadded_bytes_per_row as usize]);
    }
    drop(mapped);
    staging.unmap();
    Ok(pixels)
}

pub fn encode_png(width: u32, height: u32, rgba: Vec<u8>) -> Result<Screenshot, CaptureError> {
    let image = image::RgbaImage::from_raw(width, height, rgba)
        .ok_or(CaptureError::SizeMismatch { width, height })?;
    let mut png = Vec::new();
    image.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)?;
    log::debug!("Encoded {}x{} capture ({} bytes)", width, height, png.len());
    Ok(Screenshot {
        width,
        height,
        png: Arc::new(png),
    })
}

#[cfg(test)]
mod tests {
    use super::{encode_png, CaptureError, CaptureScheduler};
    use crate::assets::EntryId;

    #[test]
    fn captures_after_view_settles() {
        let mut scheduler = CaptureScheduler::new(3);
        let entry = Some(EntryId(1));
        scheduler.arm();
        assert_eq!(scheduler.poll(entry, false), None);
        assert_eq!(scheduler.poll(entry, false), None);
        assert_eq!(scheduler.poll(entry, false), Some(EntryId(1)));
        assert_eq!(scheduler.poll(entry, false), None);
        assert!(!scheduler.is_pending());
    }

    #[test]
    fn motion_restarts_the_settle_count() {
        let mut scheduler = CaptureScheduler::new(2);
        let entry = Some(EntryId(4));
        scheduler.arm();
        assert_eq!(scheduler.poll(entry, false), None);
        assert_eq!(scheduler.poll(entry, true), None);
        assert_eq!(scheduler.poll(entry, false), None);
        assert_eq!(scheduler.poll(entry, false), Some(EntryId(4)));
    }

    #[test]
    fn explicit_request_fires_on_next_still_frame() {
        let mut scheduler = CaptureScheduler::new(30);
        scheduler.request();
        assert_eq!(scheduler.poll(Some(EntryId(2)), true), None);
        assert_eq!(scheduler.poll(Some(EntryId(2)), false), Some(EntryId(2)));
    }

    #[test]
    fn nothing_is_captured_without_a_displayed_model() {
        let mut scheduler = CaptureScheduler::new(1);
        scheduler.arm();
        assert_eq!(scheduler.poll(None, false), None);
        assert!(scheduler.is_pending());
        assert_eq!(scheduler.poll(Some(EntryId(9)), false), Some(EntryId(9)));
    }

    #[test]
    fn png_encoding_produces_signature() {
        let shot = encode_png(2, 1, vec![255, 0, 0, 255, 0, 255, 0, 255]).unwrap();
        assert_eq!(&shot.png[..8], b"\x89PNG\r\n\x1a\n");
        let decoded = image::load_from_memory(&shot.png).unwrap().into_rgba8();
        assert_eq!(decoded.get_pixel(1, 0).0, [0, 255, 0, 255]);
    }

    #[test]
    fn mismatched_buffer_is_rejected() {
        let err = encode_png(4, 4, vec![0; 3]).unwrap_err();
        assert!(matches!(err, CaptureError::SizeMismatch { width: 4, height: 4 }));
    }
}
