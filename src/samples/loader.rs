// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Sample decoding.
//!
//! Files are decoded entirely into memory and downmixed to mono, ready to be registered
//! in the bank. Any format symphonia supports can be used (WAV, FLAC, MP3, OGG, ...).

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::{AudioBufferRef, SampleBuffer};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use tracing::{debug, info};

use super::bank::DecodedSample;

/// Errors that can occur while decoding a sample file.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audio file error: {0}")]
    Audio(#[from] SymphoniaError),

    #[error("No audio track found in {0}")]
    NoAudioTrack(String),

    #[error("Sample rate not specified in {0}")]
    UnknownSampleRate(String),

    #[error("No audio decoded from {0}")]
    Empty(String),
}

/// Decodes a file into a mono sample.
pub fn decode_file(path: &Path) -> Result<DecodedSample, LoadError> {
    let file = File::open(path).map_err(|e| {
        LoadError::Io(std::io::Error::new(
            e.kind(),
            format!("{}: {}", path.display(), e),
        ))
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }

    let probed = get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format_reader = probed.format;

    let file_name = path.display().to_string();
    let track = format_reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| LoadError::NoAudioTrack(file_name.clone()))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| LoadError::UnknownSampleRate(file_name.clone()))?;

    let mut decoder = get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut samples = Vec::new();
    let mut scratch: Option<SampleBuffer<f32>> = None;
    while let Some(packet) = next_packet(format_reader.as_mut(), track_id)? {
        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            // A corrupt packet is skipped rather than failing the whole file.
            Err(SymphoniaError::DecodeError(e)) => {
                debug!(path = ?path, error = e, "Skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        downmix_into(decoded, &mut scratch, &mut samples);
    }

    if samples.is_empty() {
        return Err(LoadError::Empty(file_name));
    }

    let sample = DecodedSample::new(samples, sample_rate);
    info!(
        path = ?path,
        sample_rate,
        frames = sample.samples().len(),
        duration_ms = sample.duration().as_millis(),
        "Sample decoded"
    );
    Ok(sample)
}

/// Reads the next packet belonging to the track. End of stream is `None`.
fn next_packet(
    format_reader: &mut dyn FormatReader,
    track_id: u32,
) -> Result<Option<Packet>, LoadError> {
    loop {
        match format_reader.next_packet() {
            Ok(packet) if packet.track_id() == track_id => return Ok(Some(packet)),
            Ok(_) => continue,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(None)
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Appends the decoded buffer to `samples`, averaging all channels.
fn downmix_into(
    decoded: AudioBufferRef<'_>,
    scratch: &mut Option<SampleBuffer<f32>>,
    samples: &mut Vec<f32>,
) {
    let spec = *decoded.spec();
    let channels = spec.channels.count().max(1);
    let capacity = decoded.capacity() as u64;

    let too_small = scratch
        .as_ref()
        .map_or(true, |buffer| buffer.capacity() < decoded.capacity() * channels);
    if too_small {
        *scratch = Some(SampleBuffer::new(capacity, spec));
    }
    let Some(buffer) = scratch.as_mut() else {
        return;
    };
    buffer.copy_interleaved_ref(decoded);

    samples.extend(
        buffer
            .samples()
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32),
    );
}
