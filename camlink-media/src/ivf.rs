//! IVF framing for encoded VP8 frames
//!
//! Remote peers deliver VP8 frames that only need to be remuxed into WebM.
//! ffmpeg reads them from a pipe as IVF, the simplest container it accepts.

use bytes::{BufMut, Bytes, BytesMut};

/// Size of the IVF file header
pub const IVF_HEADER_LEN: usize = 32;

/// Size of each IVF frame header
pub const IVF_FRAME_HEADER_LEN: usize = 12;

/// Writes an IVF header followed by frames, with a millisecond timebase
#[derive(Debug)]
pub struct IvfWriter {
    width: u16,
    height: u16,
    header_written: bool,
}

impl IvfWriter {
    /// Create a writer for frames of the given size
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: clamp_dimension(width),
            height: clamp_dimension(height),
            header_written: false,
        }
    }

    /// The 32-byte file header
    pub fn header(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(IVF_HEADER_LEN);
        buf.put_slice(b"DKIF");
        buf.put_u16_le(0); // version
        buf.put_u16_le(IVF_HEADER_LEN as u16);
        buf.put_slice(b"VP80");
        buf.put_u16_le(self.width);
        buf.put_u16_le(self.height);
        buf.put_u32_le(1000); // timebase denominator
        buf.put_u32_le(1); // timebase numerator
        // Frame count is unknown while streaming; ffmpeg ignores it.
        buf.put_u32_le(0);
        buf.put_u32_le(0);
        buf.freeze()
    }

    /// Frame it for the pipe, prefixing the file header on the first call
    pub fn frame(&mut self, data: &[u8], timestamp_ms: u64) -> Bytes {
        let header_len = if self.header_written { 0 } else { IVF_HEADER_LEN };
        let mut buf = BytesMut::with_capacity(header_len + IVF_FRAME_HEADER_LEN + data.len());
        if !self.header_written {
            buf.put(self.header());
            self.header_written = true;
        }
        buf.put_u32_le(data.len() as u32);
        buf.put_u64_le(timestamp_ms);
        buf.put_slice(data);
        buf.freeze()
    }
}

/// Frame size carried in a VP8 keyframe header, or `None` for interframes
pub fn vp8_keyframe_size(frame: &[u8]) -> Option<(u32, u32)> {
    // 3-byte frame tag, then the start code and two 14-bit dimensions.
    if frame.len() < 10 || frame[0] & 0x01 != 0 || frame[3..6] != [0x9d, 0x01, 0x2a] {
        return None;
    }
    let width = u16::from_le_bytes([frame[6], frame[7]]) & 0x3fff;
    let height = u16::from_le_bytes([frame[8], frame[9]]) & 0x3fff;
    Some((width as u32, height as u32))
}

fn clamp_dimension(value: u32) -> u16 {
    value.min(u16::MAX as u32) as u16
}
