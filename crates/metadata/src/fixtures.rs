//! Minimal FLAC files built byte by byte for tests.
//!
//! The output holds a STREAMINFO block, an optional VORBIS_COMMENT block and
//! any number of PICTURE blocks, followed by a few bytes standing in for the
//! audio frames. Tag readers only look at the metadata blocks, so this is
//! enough to exercise tag, artwork and duration extraction.

use std::fs;
use std::io;
use std::path::Path;

const BLOCK_STREAMINFO: u8 = 0;
const BLOCK_VORBIS_COMMENT: u8 = 4;
const BLOCK_PICTURE: u8 = 6;

#[derive(Debug, Clone)]
pub struct FlacFixture {
    sample_rate: u32,
    total_samples: u64,
    channels: u8,
    bits_per_sample: u8,
    comments: Vec<(String, String)>,
    pictures: Vec<(u32, String, Vec<u8>)>,
}

impl FlacFixture {
    pub fn new(sample_rate: u32, total_samples: u64) -> Self {
        Self {
            sample_rate,
            total_samples,
            channels: 2,
            bits_per_sample: 16,
            comments: Vec::new(),
            pictures: Vec::new(),
        }
    }

    /// A stream of roughly `seconds` at 44.1 kHz.
    pub fn with_seconds(seconds: u32) -> Self {
        Self::new(44_100, u64::from(seconds) * 44_100)
    }

    pub fn comment(mut self, key: &str, value: &str) -> Self {
        self.comments.push((key.to_string(), value.to_string()));
        self
    }

    pub fn picture(mut self, picture_type: u32, mime: &str, data: Vec<u8>) -> Self {
        self.pictures.push((picture_type, mime.to_string(), data));
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut blocks: Vec<(u8, Vec<u8>)> = vec![(BLOCK_STREAMINFO, self.stream_info())];
        if !self.comments.is_empty() || !self.pictures.is_empty() {
            blocks.push((BLOCK_VORBIS_COMMENT, self.vorbis_comment()));
        }
        for (picture_type, mime, data) in &self.pictures {
            blocks.push((BLOCK_PICTURE, picture_block(*picture_type, mime, data)));
        }

        let mut out = b"fLaC".to_vec();
        let count = blocks.len();
        for (index, (block_type, body)) in blocks.into_iter().enumerate() {
            let last = if index + 1 == count { 0x80 } else { 0 };
            out.push(last | block_type);
            let len = body.len() as u32;
            out.extend_from_slice(&len.to_be_bytes()[1..]);
            out.extend_from_slice(&body);
        }
        // frame sync followed by padding in place of real audio frames
        out.extend_from_slice(&[0xFF, 0xF8, 0x69, 0x08, 0x00, 0x00, 0x00, 0x00]);
        out
    }

    pub fn write(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_bytes())
    }

    fn stream_info(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(34);
        out.extend_from_slice(&4096u16.to_be_bytes());
        out.extend_from_slice(&4096u16.to_be_bytes());
        out.extend_from_slice(&[0, 0, 0]);
        out.extend_from_slice(&[0, 0, 0]);
        let packed = (self.sample_rate << 12)
            | (u32::from(self.channels - 1) << 9)
            | (u32::from(self.bits_per_sample - 1) << 4)
            | ((self.total_samples >> 32) as u32 & 0xF);
        out.extend_from_slice(&packed.to_be_bytes());
        out.extend_from_slice(&(self.total_samples as u32).to_be_bytes());
        out.extend_from_slice(&[0u8; 16]);
        out
    }

    fn vorbis_comment(&self) -> Vec<u8> {
        let vendor = b"fixture";
        let mut out = Vec::new();
        out.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
        out.extend_from_slice(vendor);
        out.extend_from_slice(&(self.comments.len() as u32).to_le_bytes());
        for (key, value) in &self.comments {
            let entry = format!("{}={}", key, value);
            out.extend_from_slice(&(entry.len() as u32).to_le_bytes());
            out.extend_from_slice(entry.as_bytes());
        }
        out
    }
}

fn picture_block(picture_type: u32, mime: &str, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&picture_type.to_be_bytes());
    out.extend_from_slice(&(mime.len() as u32).to_be_bytes());
    out.extend_from_slice(mime.as_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    // width, height, depth, indexed colours
    for value in [1u32, 1, 24, 0] {
        out.extend_from_slice(&value.to_be_bytes());
    }
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(data);
    out
}
