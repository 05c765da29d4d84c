// EBML/Matroska writing helpers for raw-video artifacts

use std::io::{self, Write};

pub const EBML_HEADER: u32 = 0x1A45DFA3;
pub const SEGMENT: u32 = 0x18538067;
pub const INFO: u32 = 0x1549A966;
pub const TIMESTAMP_SCALE: u32 = 0x2AD7B1;
pub const DURATION: u32 = 0x4489;
pub const MUXING_APP: u32 = 0x4D80;
pub const WRITING_APP: u32 = 0x5741;
pub const TRACKS: u32 = 0x1654AE6B;
pub const TRACK_ENTRY: u32 = 0xAE;
pub const TRACK_NUMBER: u32 = 0xD7;
pub const TRACK_UID: u32 = 0x73C5;
pub const TRACK_TYPE: u32 = 0x83;
pub const FLAG_LACING: u32 = 0x9C;
pub const CODEC_ID: u32 = 0x86;
pub const DEFAULT_DURATION: u32 = 0x23E383;
pub const VIDEO: u32 = 0xE0;
pub const PIXEL_WIDTH: u32 = 0xB0;
pub const PIXEL_HEIGHT: u32 = 0xBA;
pub const COLOUR_SPACE: u32 = 0x2EB524;
pub const CLUSTER: u32 = 0x1F43B675;
pub const CLUSTER_TIMESTAMP: u32 = 0xE7;
pub const SIMPLE_BLOCK: u32 = 0xA3;

/// Timestamps are written in milliseconds
const TIMESTAMP_SCALE_NS: u64 = 1_000_000;

/// FourCC understood by common demuxers as packed BGR24
const BGR24_FOURCC: [u8; 4] = [b'B', b'G', b'R', 24];

const APP_NAME: &str = "telugu_archive";

pub fn write_ebml_id(buf: &mut Vec<u8>, id: u32) {
    // EBML IDs already include their size marker bits, just write raw bytes
    if id <= 0xFF {
        buf.push(id as u8);
    } else if id <= 0xFFFF {
        buf.push((id >> 8) as u8);
        buf.push(id as u8);
    } else if id <= 0xFFFFFF {
        buf.push((id >> 16) as u8);
        buf.push((id >> 8) as u8);
        buf.push(id as u8);
    } else {
        buf.extend_from_slice(&id.to_be_bytes());
    }
}

/// Write a data size as the shortest EBML varint that can hold it
pub fn write_ebml_size(buf: &mut Vec<u8>, size: u64) {
    // All-ones payloads are reserved for "unknown size"
    let mut len = 1;
    while len < 8 && size >= (1u64 << (7 * len)) - 1 {
        len += 1;
    }
    let marked = size | (1u64 << (7 * len));
    for i in (0..len).rev() {
        buf.push((marked >> (i * 8)) as u8);
    }
}

pub fn write_ebml_unknown_size(buf: &mut Vec<u8>) {
    buf.extend_from_slice(&[0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
}

pub fn write_ebml_uint(buf: &mut Vec<u8>, id: u32, value: u64) {
    write_ebml_id(buf, id);
    let bytes = if value == 0 {
        1
    } else {
        ((64 - value.leading_zeros()) + 7) / 8
    } as usize;
    write_ebml_size(buf, bytes as u64);
    for i in (0..bytes).rev() {
        buf.push((value >> (i * 8)) as u8);
    }
}

pub fn write_ebml_string(buf: &mut Vec<u8>, id: u32, value: &str) {
    write_ebml_id(buf, id);
    write_ebml_size(buf, value.len() as u64);
    buf.extend_from_slice(value.as_bytes());
}

pub fn write_ebml_binary(buf: &mut Vec<u8>, id: u32, data: &[u8]) {
    write_ebml_id(buf, id);
    write_ebml_size(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

pub fn write_ebml_float(buf: &mut Vec<u8>, id: u32, value: f64) {
    write_ebml_id(buf, id);
    write_ebml_size(buf, 8);
    buf.extend_from_slice(&value.to_be_bytes());
}

pub fn write_ebml_master(buf: &mut Vec<u8>, id: u32, content: &[u8]) {
    write_ebml_binary(buf, id, content);
}

/// Shape of the single raw video track
#[derive(Debug, Clone, Copy)]
pub struct RawVideoTrack {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl RawVideoTrack {
    /// Presentation time of frame `index`, rounded to the nearest millisecond
    pub fn frame_timestamp_ms(&self, index: u64) -> u64 {
        let fps = self.fps as u64;
        (index * 1000 + fps / 2) / fps
    }

    pub fn duration_ms(&self, frame_count: u64) -> f64 {
        frame_count as f64 * 1000.0 / self.fps as f64
    }

    fn default_duration_ns(&self) -> u64 {
        let fps = self.fps as u64;
        (1_000_000_000 + fps / 2) / fps
    }
}

/// EBML header plus the Segment opening, Info and Tracks
fn build_header(track: &RawVideoTrack, frame_count: u64) -> Vec<u8> {
    let mut out = Vec::new();

    let mut ebml_header = Vec::new();
    write_ebml_uint(&mut ebml_header, 0x4286, 1); // EBMLVersion
    write_ebml_uint(&mut ebml_header, 0x42F7, 1); // EBMLReadVersion
    write_ebml_uint(&mut ebml_header, 0x42F2, 4); // EBMLMaxIDLength
    write_ebml_uint(&mut ebml_header, 0x42F3, 8); // EBMLMaxSizeLength
    write_ebml_string(&mut ebml_header, 0x4282, "matroska"); // DocType
    write_ebml_uint(&mut ebml_header, 0x4287, 4); // DocTypeVersion
    write_ebml_uint(&mut ebml_header, 0x4285, 2); // DocTypeReadVersion
    write_ebml_master(&mut out, EBML_HEADER, &ebml_header);

    write_ebml_id(&mut out, SEGMENT);
    write_ebml_unknown_size(&mut out);

    let mut info = Vec::new();
    write_ebml_uint(&mut info, TIMESTAMP_SCALE, TIMESTAMP_SCALE_NS);
    write_ebml_float(&mut info, DURATION, track.duration_ms(frame_count));
    write_ebml_string(&mut info, MUXING_APP, APP_NAME);
    write_ebml_string(&mut info, WRITING_APP, APP_NAME);
    write_ebml_master(&mut out, INFO, &info);

    let mut video = Vec::new();
    write_ebml_uint(&mut video, PIXEL_WIDTH, track.width as u64);
    write_ebml_uint(&mut video, PIXEL_HEIGHT, track.height as u64);
    write_ebml_binary(&mut video, COLOUR_SPACE, &BGR24_FOURCC);

    let mut track_entry = Vec::new();
    write_ebml_uint(&mut track_entry, TRACK_NUMBER, 1);
    write_ebml_uint(&mut track_entry, TRACK_UID, 1);
    write_ebml_uint(&mut track_entry, TRACK_TYPE, 1); // video
    write_ebml_uint(&mut track_entry, FLAG_LACING, 0);
    write_ebml_string(&mut track_entry, CODEC_ID, "V_UNCOMPRESSED");
    write_ebml_uint(&mut track_entry, DEFAULT_DURATION, track.default_duration_ns());
    write_ebml_master(&mut track_entry, VIDEO, &video);

    let mut tracks = Vec::new();
    write_ebml_master(&mut tracks, TRACK_ENTRY, &track_entry);
    write_ebml_master(&mut out, TRACKS, &tracks);

    out
}

/// Write `frames` as one Matroska file, one frame per 1/fps slot.
///
/// Frames go out in iteration order; each cluster holds one second of video.
pub fn write_raw_video<'a, W, I>(
    out: &mut W,
    track: &RawVideoTrack,
    frame_count: u64,
    frames: I,
) -> io::Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a [u8]>,
{
    out.write_all(&build_header(track, frame_count))?;

    let frames_per_cluster = track.fps.max(1) as u64;
    let mut cluster: Vec<u8> = Vec::new();
    let mut cluster_start_ms = 0u64;

    for (index, frame) in frames.into_iter().enumerate() {
        let index = index as u64;
        let timestamp_ms = track.frame_timestamp_ms(index);

        if index % frames_per_cluster == 0 {
            if !cluster.is_empty() {
                flush_cluster(out, &cluster)?;
                cluster.clear();
            }
            cluster_start_ms = timestamp_ms;
            write_ebml_uint(&mut cluster, CLUSTER_TIMESTAMP, cluster_start_ms);
        }

        let relative = (timestamp_ms - cluster_start_ms) as i16;
        write_ebml_id(&mut cluster, SIMPLE_BLOCK);
        write_ebml_size(&mut cluster, 4 + frame.len() as u64);
        cluster.push(0x81); // track number 1
        cluster.extend_from_slice(&relative.to_be_bytes());
        cluster.push(0x80); // keyframe
        cluster.extend_from_slice(frame);
    }

    if !cluster.is_empty() {
        flush_cluster(out, &cluster)?;
    }
    out.flush()
}

fn flush_cluster<W: Write>(out: &mut W, content: &[u8]) -> io::Result<()> {
    let mut head = Vec::with_capacity(12);
    write_ebml_id(&mut head, CLUSTER);
    write_ebml_size(&mut head, content.len() as u64);
    out.write_all(&head)?;
    out.write_all(content)
}

/// What a written raw-video file claims about itself
#[derive(Debug, Default, Clone, PartialEq)]
pub struct VideoProbe {
    pub duration_ms: Option<f64>,
    pub default_duration_ns: Option<u64>,
    pub width: Option<u64>,
    pub height: Option<u64>,
    pub codec_id: Option<String>,
    pub frames: Vec<ProbedFrame>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbedFrame {
    pub timestamp_ms: u64,
    pub size: usize,
    pub first_byte: Option<u8>,
}

impl VideoProbe {
    /// Playback length derived from the frame count and the per-frame duration
    pub fn playback_seconds(&self) -> Option<f64> {
        self.default_duration_ns
            .map(|ns| self.frames.len() as f64 * ns as f64 / 1e9)
    }
}

fn read_ebml_id(data: &[u8], pos: usize) -> Option<(u32, usize)> {
    let first = *data.get(pos)?;
    let len = first.leading_zeros() as usize + 1;
    if len > 4 || pos + len > data.len() {
        return None;
    }
    let id = data[pos..pos + len]
        .iter()
        .fold(0u32, |acc, b| (acc << 8) | *b as u32);
    Some((id, len))
}

/// Returns (size, bytes consumed); `None` size means unknown
fn read_ebml_size(data: &[u8], pos: usize) -> Option<(Option<u64>, usize)> {
    let first = *data.get(pos)?;
    let len = first.leading_zeros() as usize + 1;
    if len > 8 || pos + len > data.len() {
        return None;
    }
    let mut value = (first as u64) & ((1u64 << (8 - len)) - 1);
    for b in &data[pos + 1..pos + len] {
        value = (value << 8) | *b as u64;
    }
    let unknown = value == (1u64 << (7 * len)) - 1;
    Some((if unknown { None } else { Some(value) }, len))
}

fn read_uint(payload: &[u8]) -> u64 {
    payload.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64)
}

fn read_float(payload: &[u8]) -> Option<f64> {
    match payload.len() {
        4 => Some(f32::from_be_bytes(payload.try_into().ok()?) as f64),
        8 => Some(f64::from_be_bytes(payload.try_into().ok()?)),
        _ => None,
    }
}

/// Walk a file produced by [`write_raw_video`] and report what it contains
pub fn probe_raw_video(data: &[u8]) -> Option<VideoProbe> {
    let mut probe = VideoProbe::default();
    let mut cluster_ms = 0u64;
    walk(data, 0, data.len(), &mut probe, &mut cluster_ms)?;
    Some(probe)
}

fn walk(
    data: &[u8],
    mut pos: usize,
    end: usize,
    probe: &mut VideoProbe,
    cluster_ms: &mut u64,
) -> Option<()> {
    while pos < end {
        let (id, id_len) = read_ebml_id(data, pos)?;
        let (size, size_len) = read_ebml_size(data, pos + id_len)?;
        let start = pos + id_len + size_len;
        if start > end {
            return None;
        }
        let stop = match size {
            Some(s) => start.checked_add(s as usize)?.min(end),
            None => end,
        };
        let payload = &data[start..stop];

        match id {
            SEGMENT | INFO | TRACKS | TRACK_ENTRY | VIDEO | CLUSTER => {
                walk(data, start, stop, probe, cluster_ms)?;
            }
            DURATION => probe.duration_ms = read_float(payload),
            DEFAULT_DURATION => probe.default_duration_ns = Some(read_uint(payload)),
            PIXEL_WIDTH => probe.width = Some(read_uint(payload)),
            PIXEL_HEIGHT => probe.height = Some(read_uint(payload)),
            CODEC_ID => probe.codec_id = Some(String::from_utf8_lossy(payload).into_owned()),
            CLUSTER_TIMESTAMP => *cluster_ms = read_uint(payload),
            SIMPLE_BLOCK if payload.len() >= 4 => {
                let relative = i16::from_be_bytes([payload[1], payload[2]]);
                probe.frames.push(ProbedFrame {
                    timestamp_ms: (*cluster_ms as i64 + relative as i64) as u64,
                    size: payload.len() - 4,
                    first_byte: payload.get(4).copied(),
                });
            }
            _ => {}
        }
        pos = stop;
    }
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ebml_size_lengths() {
        let mut buf = Vec::new();
        write_ebml_size(&mut buf, 5);
        assert_eq!(buf, vec![0x85]);

        buf.clear();
        write_ebml_size(&mut buf, 127);
        assert_eq!(buf, vec![0x40, 0x7F]);

        buf.clear();
        write_ebml_size(&mut buf, 300_000_000);
        assert_eq!(buf.len(), 5);
        assert_eq!(read_ebml_size(&buf, 0), Some((Some(300_000_000), 5)));
    }

    #[test]
    fn test_frame_timestamps_at_15_fps() {
        let track = RawVideoTrack {
            width: 2,
            height: 2,
            fps: 15,
        };
        assert_eq!(track.frame_timestamp_ms(0), 0);
        assert_eq!(track.frame_timestamp_ms(1), 67);
        assert_eq!(track.frame_timestamp_ms(15), 1000);
        assert_eq!(track.duration_ms(45), 3000.0);
        assert_eq!(track.default_duration_ns(), 66_666_667);
    }

    #[test]
    fn test_write_then_probe() {
        let track = RawVideoTrack {
            width: 2,
            height: 1,
            fps: 15,
        };
        let frames: Vec<Vec<u8>> = (0..20u8).map(|i| vec![i; 6]).collect();
        let mut out = Vec::new();
        write_raw_video(
            &mut out,
            &track,
            frames.len() as u64,
            frames.iter().map(|f| f.as_slice()),
        )
        .unwrap();

        let probe = probe_raw_video(&out).unwrap();
        assert_eq!(probe.codec_id.as_deref(), Some("V_UNCOMPRESSED"));
        assert_eq!(probe.width, Some(2));
        assert_eq!(probe.height, Some(1));
        assert_eq!(probe.frames.len(), 20);
        assert_eq!(probe.frames[15].timestamp_ms, 1000);
        assert_eq!(probe.frames[16].timestamp_ms, 1067);
        for (i, frame) in probe.frames.iter().enumerate() {
            assert_eq!(frame.first_byte, Some(i as u8));
            assert_eq!(frame.size, 6);
        }
    }
}
