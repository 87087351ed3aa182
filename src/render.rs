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

//! Offline rendering: drives an engine block by block the way an audio callback would.

use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::info;

use crate::midi::sequence::Sequence;
use crate::samples::{SamplerControl, VoiceEngine};

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Channel count must be between 1 and {}", u16::MAX)]
    InvalidChannels,

    #[error("Block size must be greater than zero")]
    InvalidBlockSize,
}

/// How to render a sequence.
#[derive(Clone, Copy, Debug)]
pub struct RenderOptions {
    /// Frames per call to the engine.
    pub block_size: usize,
    /// Interleaved output channels.
    pub channels: usize,
    /// Extra frames rendered after the last event so releases can ring out.
    pub tail_frames: u64,
}

/// Renders the whole sequence and returns the interleaved audio. The control handle
/// collects whatever the engine retires after every block.
pub fn render_sequence(
    engine: &mut VoiceEngine,
    control: &mut SamplerControl,
    sequence: &Sequence,
    options: &RenderOptions,
) -> Result<Vec<f32>, RenderError> {
    if options.channels == 0 || options.channels > u16::MAX as usize {
        return Err(RenderError::InvalidChannels);
    }
    if options.block_size == 0 {
        return Err(RenderError::InvalidBlockSize);
    }

    let total_frames = sequence.length_frames() + options.tail_frames;
    let mut output = Vec::with_capacity(total_frames as usize * options.channels);
    let mut block = vec![0.0f32; options.block_size * options.channels];
    let mut events = Vec::new();
    let mut scheduler = sequence.scheduler();

    while scheduler.position() < total_frames {
        let remaining = (total_frames - scheduler.position()) as usize;
        let frames = remaining.min(options.block_size);
        let block = &mut block[..frames * options.channels];

        scheduler.next_block(frames, &mut events);
        engine.render_block(block, options.channels, &events);
        output.extend_from_slice(block);
        control.collect_garbage();
    }

    info!(
        frames = total_frames,
        channels = options.channels,
        events = sequence.len(),
        "Rendered sequence"
    );
    Ok(output)
}

/// Writes interleaved audio to a 32-bit float WAV file.
pub fn write_wav(
    path: &Path,
    samples: &[f32],
    channels: usize,
    sample_rate: u32,
) -> Result<(), RenderError> {
    let channels = u16::try_from(channels).map_err(|_| RenderError::InvalidChannels)?;
    if channels == 0 {
        return Err(RenderError::InvalidChannels);
    }

    let mut writer = WavWriter::create(
        path,
        WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        },
    )?;
    for sample in samples {
        writer.write_sample(*sample)?;
    }
    writer.finalize()?;

    info!(path = ?path, channels, sample_rate, "Wrote WAV file");
    Ok(())
}
