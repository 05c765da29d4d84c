use crossbeam_channel::{unbounded, Receiver, Sender};
use log::debug;

use crate::error::{ArchiveError, ArchiveResult};

/// Bytes per pixel of a BGR24 frame
pub const BGR24_BYTES_PER_PIXEL: usize = 3;

/// One raw video frame, BGR24, rows top to bottom
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> ArchiveResult<Self> {
        let expected = width as usize * height as usize * BGR24_BYTES_PER_PIXEL;
        if width == 0 || height == 0 || data.len() != expected {
            return Err(ArchiveError::Encode(format!(
                "frame {}x{} needs {} bytes of BGR24 data, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }
}

#[cfg(test)]
impl VideoFrame {
    pub(crate) fn solid(width: u32, height: u32, bgr: [u8; 3]) -> Self {
        let pixels = width as usize * height as usize;
        Self {
            width,
            height,
            data: bgr.repeat(pixels),
        }
    }
}

/// One block of interleaved audio samples in [-1.0, 1.0]
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioBlock {
    pub fn new(channels: u16, samples: Vec<f32>) -> ArchiveResult<Self> {
        if channels == 0 || samples.len() % channels as usize != 0 {
            return Err(ArchiveError::Encode(format!(
                "{} samples cannot be split into {} channel(s)",
                samples.len(),
                channels
            )));
        }
        Ok(Self { channels, samples })
    }

    /// Decode little-endian 32-bit float samples
    pub fn from_f32le(channels: u16, bytes: &[u8]) -> ArchiveResult<Self> {
        if bytes.len() % 4 != 0 {
            return Err(ArchiveError::Encode(format!(
                "f32le payload of {} bytes is not a whole number of samples",
                bytes.len()
            )));
        }
        let samples = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Self::new(channels, samples)
    }

    /// Decode little-endian signed 16-bit samples
    pub fn from_s16le(channels: u16, bytes: &[u8]) -> ArchiveResult<Self> {
        if bytes.len() % 2 != 0 {
            return Err(ArchiveError::Encode(format!(
                "s16le payload of {} bytes is not a whole number of samples",
                bytes.len()
            )));
        }
        let samples = bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect();
        Self::new(channels, samples)
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }
}

enum CaptureEvent {
    Video(VideoFrame),
    Audio(AudioBlock),
}

/// Contents of a capture session at the moment it was drained
#[derive(Debug, Default)]
pub struct CapturedMedia {
    pub video_frames: Vec<VideoFrame>,
    pub audio_blocks: Vec<AudioBlock>,
}

impl CapturedMedia {
    pub fn is_empty(&self) -> bool {
        self.video_frames.is_empty() && self.audio_blocks.is_empty()
    }
}

/// Producer half handed to the live-media side.
///
/// Sends never block: the channel is unbounded. Once the owning
/// [`CaptureBuffer`] is replaced or dropped, pushed events are discarded.
#[derive(Clone)]
pub struct CaptureSink {
    sender: Sender<CaptureEvent>,
}

impl CaptureSink {
    /// Video callback: buffers a copy and hands the frame back unchanged
    pub fn on_video_frame(&self, frame: VideoFrame) -> VideoFrame {
        self.push_video_frame(frame.clone());
        frame
    }

    /// Audio callback: buffers a copy and hands the block back unchanged
    pub fn on_audio_block(&self, block: AudioBlock) -> AudioBlock {
        self.push_audio_block(block.clone());
        block
    }

    /// Returns false when the capture session this sink belonged to is gone
    pub fn push_video_frame(&self, frame: VideoFrame) -> bool {
        if self.sender.send(CaptureEvent::Video(frame)).is_err() {
            debug!("Dropping video frame for a discarded capture session");
            return false;
        }
        true
    }

    pub fn push_audio_block(&self, block: AudioBlock) -> bool {
        if self.sender.send(CaptureEvent::Audio(block)).is_err() {
            debug!("Dropping audio block for a discarded capture session");
            return false;
        }
        true
    }
}

/// Append-only accumulator for one capture session.
///
/// No size cap: a capture that runs forever grows memory without bound.
pub struct CaptureBuffer {
    sender: Sender<CaptureEvent>,
    receiver: Receiver<CaptureEvent>,
}

impl Default for CaptureBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBuffer {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    pub fn sink(&self) -> CaptureSink {
        CaptureSink {
            sender: self.sender.clone(),
        }
    }

    /// Take everything buffered so far, each stream in arrival order
    pub fn drain(&self) -> CapturedMedia {
        let mut media = CapturedMedia::default();
        for event in self.receiver.try_iter() {
            match event {
                CaptureEvent::Video(frame) => media.video_frames.push(frame),
                CaptureEvent::Audio(block) => media.audio_blocks.push(block),
            }
        }
        debug!(
            "Drained {} video frame(s) and {} audio block(s)",
            media.video_frames.len(),
            media.audio_blocks.len()
        );
        media
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_preserves_order_per_stream() {
        let buffer = CaptureBuffer::new();
        let sink = buffer.sink();

        for i in 0..5u8 {
            sink.push_video_frame(VideoFrame::solid(2, 2, [i, i, i]));
            sink.push_audio_block(AudioBlock::new(1, vec![i as f32 / 10.0]).unwrap());
        }

        let media = buffer.drain();
        assert_eq!(media.video_frames.len(), 5);
        assert_eq!(media.audio_blocks.len(), 5);
        for (i, frame) in media.video_frames.iter().enumerate() {
            assert_eq!(frame.data[0], i as u8);
        }
        for (i, block) in media.audio_blocks.iter().enumerate() {
            assert_eq!(block.samples[0], i as f32 / 10.0);
        }

        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn test_callbacks_are_identity() {
        let buffer = CaptureBuffer::new();
        let sink = buffer.sink();

        let frame = VideoFrame::solid(4, 3, [1, 2, 3]);
        assert_eq!(sink.on_video_frame(frame.clone()), frame);

        let block = AudioBlock::new(2, vec![0.1, -0.1, 0.2, -0.2]).unwrap();
        assert_eq!(sink.on_audio_block(block.clone()), block);

        let media = buffer.drain();
        assert_eq!(media.video_frames, vec![frame]);
        assert_eq!(media.audio_blocks, vec![block]);
    }

    #[test]
    fn test_sink_of_dropped_buffer_discards() {
        let buffer = CaptureBuffer::new();
        let sink = buffer.sink();
        drop(buffer);
        assert!(!sink.push_video_frame(VideoFrame::solid(1, 1, [0, 0, 0])));
    }

    #[test]
    fn test_frame_and_block_validation() {
        assert!(VideoFrame::new(2, 2, vec![0; 12]).is_ok());
        assert!(VideoFrame::new(2, 2, vec![0; 11]).is_err());
        assert!(VideoFrame::new(0, 2, vec![]).is_err());

        assert!(AudioBlock::new(2, vec![0.0; 3]).is_err());
        assert!(AudioBlock::from_f32le(1, &[0, 0, 0]).is_err());

        let block = AudioBlock::from_s16le(1, &i16::MIN.to_le_bytes()).unwrap();
        assert_eq!(block.samples, vec![-1.0]);
        let block = AudioBlock::from_f32le(1, &0.5f32.to_le_bytes()).unwrap();
        assert_eq!(block.samples, vec![0.5]);
        assert_eq!(block.frames(), 1);
    }
}
