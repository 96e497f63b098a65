//! Minimal WAV (RIFF) container construction and header parsing.
//!
//! Piper's `--output-raw` mode emits headerless 16-bit mono PCM. This module
//! wraps those samples into a canonical 44-byte WAV container and reads
//! sample rate / channels / bit depth / duration back out of any PCM WAV.
//!
//! Canonical header layout (all multi-byte fields little-endian):
//!   0  "RIFF"        4  riff size (36 + data)   8  "WAVE"
//!   12 "fmt "        16 16 (fmt size)           20 1 (PCM)
//!   22 channels      24 sample rate             28 byte rate
//!   32 block align   34 bits per sample
//!   36 "data"        40 data size               44 samples...

use std::io::{Cursor, Write};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use serde::Serialize;

use crate::error::{ErrorKind, PiperError, Result};

/// Piper "medium" and "high" voices synthesize at 22.05 kHz.
pub const DEFAULT_SAMPLE_RATE: u32 = 22050;
pub const HEADER_LEN: usize = 44;

const PCM_FORMAT: u16 = 1;
const CHANNELS: u16 = 1;
const BITS_PER_SAMPLE: u16 = 16;

/// Header facts recovered from a WAV buffer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WavInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
    /// Seconds.
    pub duration: f64,
    /// Bytes of sample data.
    pub data_size: u32,
}

/// Wrap raw 16-bit mono PCM into a WAV container.
pub fn wrap_pcm_as_wav(pcm: &[u8], sample_rate: u32) -> Vec<u8> {
    let data_size = u32::try_from(pcm.len()).unwrap_or(u32::MAX);
    let block_align = CHANNELS * BITS_PER_SAMPLE / 8;
    let byte_rate = sample_rate.saturating_mul(u32::from(block_align));

    let mut out = Cursor::new(Vec::with_capacity(HEADER_LEN + pcm.len()));
    // Writes into a Vec<u8> cannot fail.
    let _ = write_header(&mut out, data_size, sample_rate, byte_rate, block_align);
    let mut bytes = out.into_inner();
    bytes.extend_from_slice(pcm);
    bytes
}

fn write_header<W: Write>(
    w: &mut W,
    data_size: u32,
    sample_rate: u32,
    byte_rate: u32,
    block_align: u16,
) -> std::io::Result<()> {
    w.write_all(b"RIFF")?;
    w.write_u32::<LittleEndian>(data_size.saturating_add(36))?;
    w.write_all(b"WAVE")?;
    w.write_all(b"fmt ")?;
    w.write_u32::<LittleEndian>(16)?;
    w.write_u16::<LittleEndian>(PCM_FORMAT)?;
    w.write_u16::<LittleEndian>(CHANNELS)?;
    w.write_u32::<LittleEndian>(sample_rate)?;
    w.write_u32::<LittleEndian>(byte_rate)?;
    w.write_u16::<LittleEndian>(block_align)?;
    w.write_u16::<LittleEndian>(BITS_PER_SAMPLE)?;
    w.write_all(b"data")?;
    w.write_u32::<LittleEndian>(data_size)?;
    Ok(())
}

/// True when `bytes` is long enough and carries both RIFF/WAVE markers.
pub fn is_valid_wav(bytes: &[u8]) -> bool {
    bytes.len() >= HEADER_LEN && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

/// Parse the header of a PCM WAV buffer.
///
/// Walks sub-chunks from offset 12 looking for `fmt ` and `data`. If no
/// `data` chunk is present the payload is assumed to follow a canonical
/// 44-byte header.
pub fn parse_wav_header(bytes: &[u8]) -> Result<WavInfo> {
    if !is_valid_wav(bytes) {
        return Err(PiperError::new(
            ErrorKind::SynthesisFailed,
            format!("Invalid WAV data ({} bytes)", bytes.len()),
        ));
    }

    let mut channels = CHANNELS;
    let mut sample_rate = DEFAULT_SAMPLE_RATE;
    let mut bit_depth = BITS_PER_SAMPLE;
    let mut data_size: Option<u32> = None;

    let mut offset = 12usize;
    while offset + 8 <= bytes.len() {
        let id = &bytes[offset..offset + 4];
        let size = LittleEndian::read_u32(&bytes[offset + 4..offset + 8]);
        let body = offset + 8;

        if id == b"fmt " && body + 16 <= bytes.len() {
            channels = LittleEndian::read_u16(&bytes[body + 2..body + 4]);
            sample_rate = LittleEndian::read_u32(&bytes[body + 4..body + 8]);
            bit_depth = LittleEndian::read_u16(&bytes[body + 14..body + 16]);
        } else if id == b"data" {
            data_size = Some(size);
            break;
        }

        // Chunks are word-aligned: odd sizes carry one pad byte.
        let advance = (size as usize).saturating_add(size as usize & 1);
        offset = match body.checked_add(advance) {
            Some(next) => next,
            None => break,
        };
    }

    let data_size = data_size.unwrap_or((bytes.len() - HEADER_LEN) as u32);
    let bytes_per_second = sample_rate as f64 * channels as f64 * (bit_depth as f64 / 8.0);
    let duration = if bytes_per_second > 0.0 {
        data_size as f64 / bytes_per_second
    } else {
        0.0
    };

    Ok(WavInfo {
        sample_rate,
        channels,
        bit_depth,
        duration,
        data_size,
    })
}
