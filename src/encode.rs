use hound::{WavSpec, WavWriter};
use log::{debug, info, warn};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::capture::{AudioBlock, CapturedMedia, VideoFrame};
use crate::constants::{generate_file_token, AUDIO_SAMPLE_RATE, VIDEO_FPS};
use crate::error::{ArchiveError, ArchiveResult};
use crate::mkv::{write_raw_video, RawVideoTrack};
use crate::session::Session;
use crate::storage::StoragePaths;

/// Paths written by one save; `None` means that stream had nothing to encode
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct EncodeOutcome {
    pub video_path: Option<PathBuf>,
    pub audio_path: Option<PathBuf>,
}

impl EncodeOutcome {
    /// Record written artifacts as the session's most recent ones
    pub fn apply_to(&self, session: &mut Session) {
        if let Some(path) = &self.video_path {
            session.set_last_video_path(path.clone());
        }
        if let Some(path) = &self.audio_path {
            session.set_last_audio_path(path.clone());
        }
    }
}

/// Open a brand-new file, refusing to clobber anything already there
pub(crate) fn create_new_file(path: &Path) -> ArchiveResult<File> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| ArchiveError::io(path, e))
}

/// Encode both streams of a drained capture and record the results on the session.
///
/// Each stream is independent: an empty one is skipped and leaves the
/// session's matching path untouched, and units that do not fit a stream's
/// shape are dropped without affecting the other stream.
pub fn save_recording(
    paths: &StoragePaths,
    session: &mut Session,
    media: &CapturedMedia,
) -> ArchiveResult<EncodeOutcome> {
    let outcome = encode_media(paths, media)?;
    outcome.apply_to(session);
    Ok(outcome)
}

/// Encode without touching any session
pub fn encode_media(paths: &StoragePaths, media: &CapturedMedia) -> ArchiveResult<EncodeOutcome> {
    let video_path = if media.video_frames.is_empty() {
        debug!("No video frames captured, skipping video encode");
        None
    } else {
        Some(encode_video(&paths.video_dir, &media.video_frames)?)
    };

    let audio_path = if media.audio_blocks.is_empty() {
        debug!("No audio blocks captured, skipping audio encode");
        None
    } else {
        Some(encode_audio(&paths.audio_dir, &media.audio_blocks)?)
    };

    Ok(EncodeOutcome {
        video_path,
        audio_path,
    })
}

/// Frames sharing the first frame's size, in arrival order.
///
/// Frames of any other size are dropped.
fn consistent_frames(frames: &[VideoFrame]) -> ArchiveResult<Vec<&VideoFrame>> {
    let first = frames
        .first()
        .ok_or_else(|| ArchiveError::Encode("no video frames to encode".to_string()))?;
    let kept: Vec<&VideoFrame> = frames
        .iter()
        .filter(|f| f.width == first.width && f.height == first.height)
        .collect();
    if kept.len() < frames.len() {
        warn!(
            "Dropped {} of {} video frame(s) not matching {}x{}",
            frames.len() - kept.len(),
            frames.len(),
            first.width,
            first.height
        );
    }
    Ok(kept)
}

/// Blocks sharing the first block's channel count, in arrival order.
///
/// Blocks with any other layout are dropped.
fn consistent_blocks(blocks: &[AudioBlock]) -> ArchiveResult<Vec<&AudioBlock>> {
    let first = blocks
        .first()
        .ok_or_else(|| ArchiveError::Encode("no audio blocks to encode".to_string()))?;
    let kept: Vec<&AudioBlock> = blocks
        .iter()
        .filter(|b| b.channels == first.channels)
        .collect();
    if kept.len() < blocks.len() {
        warn!(
            "Dropped {} of {} audio block(s) not matching {} channel(s)",
            blocks.len() - kept.len(),
            blocks.len(),
            first.channels
        );
    }
    Ok(kept)
}

/// Write frames as a 15 fps Matroska file; duration is frames / 15 seconds
pub fn encode_video(video_dir: &Path, frames: &[VideoFrame]) -> ArchiveResult<PathBuf> {
    let frames = consistent_frames(frames)?;
    let first = frames[0];

    let track = RawVideoTrack {
        width: first.width,
        height: first.height,
        fps: VIDEO_FPS,
    };

    let path = video_dir.join(format!("{}.mkv", generate_file_token()));
    let file = create_new_file(&path)?;
    let mut writer = BufWriter::new(file);
    write_raw_video(
        &mut writer,
        &track,
        frames.len() as u64,
        frames.iter().map(|f| f.data.as_slice()),
    )
    .map_err(|e| ArchiveError::io(&path, e))?;

    info!(
        "Video saved: {} ({} frames, {:.3}s)",
        path.display(),
        frames.len(),
        track.duration_ms(frames.len() as u64) / 1000.0
    );
    Ok(path)
}

/// Convert a float sample in [-1, 1] to 16-bit PCM, clipping out-of-range input
pub fn sample_to_pcm16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

/// Concatenate blocks in arrival order and write 16-bit PCM WAV at 48 kHz
pub fn encode_audio(audio_dir: &Path, blocks: &[AudioBlock]) -> ArchiveResult<PathBuf> {
    let blocks = consistent_blocks(blocks)?;
    let channels = blocks[0].channels;

    let spec = WavSpec {
        channels,
        sample_rate: AUDIO_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let path = audio_dir.join(format!("{}.wav", generate_file_token()));
    let file = create_new_file(&path)?;
    let mut writer = WavWriter::new(BufWriter::new(file), spec).map_err(|e| wav_error(&path, e))?;
    let mut total = 0usize;
    for block in &blocks {
        for &sample in &block.samples {
            writer
                .write_sample(sample_to_pcm16(sample))
                .map_err(|e| wav_error(&path, e))?;
        }
        total += block.frames();
    }
    writer.finalize().map_err(|e| wav_error(&path, e))?;

    info!(
        "Audio saved: {} ({} block(s), {:.3}s)",
        path.display(),
        blocks.len(),
        total as f64 / AUDIO_SAMPLE_RATE as f64
    );
    Ok(path)
}

fn wav_error(path: &Path, err: hound::Error) -> ArchiveError {
    match err {
        hound::Error::IoError(e) => ArchiveError::io(path, e),
        other => ArchiveError::Encode(other.to_string()),
    }
}
