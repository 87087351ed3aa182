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

//! Shared helpers for tests.

use std::error::Error;
use std::f32::consts::PI;
use std::fs::File;
use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::samples::{DecodedSample, Envelope};

/// A sample holding the same value in every frame.
pub fn constant_sample(value: f32, frames: usize, sample_rate: u32) -> DecodedSample {
    DecodedSample::new(vec![value; frames], sample_rate)
}

/// A flat envelope at 0.6 with a release shorter than the minimum fade.
pub fn test_envelope() -> Envelope {
    Envelope {
        start_gain: 0.6,
        sustain_gain: 0.6,
        decay_seconds: 0.0,
        release_seconds: 0.001,
    }
}

/// Generate a sine wave.
pub fn sine(frequency: f32, amplitude: f32, sample_rate: u32, duration_seconds: f32) -> Vec<f32> {
    let sample_count = (sample_rate as f32 * duration_seconds) as usize;
    (0..sample_count)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            amplitude * (2.0 * PI * frequency * t).sin()
        })
        .collect()
}

/// Calculate RMS (Root Mean Square) of a signal.
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|&x| x * x).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Writes one vector per channel to a 32-bit float WAV file.
pub fn write_wav(
    path: &Path,
    channels: &[Vec<f32>],
    sample_rate: u32,
) -> Result<(), Box<dyn Error>> {
    let file = File::create(path)?;
    let num_channels = channels.len();
    assert!(num_channels <= u16::MAX.into(), "Too many channels!");

    let mut writer = WavWriter::new(
        file,
        WavSpec {
            channels: num_channels as u16,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        },
    )?;

    let frames = channels.iter().map(|c| c.len()).max().unwrap_or(0);
    for frame in 0..frames {
        for channel in channels {
            writer.write_sample(channel.get(frame).copied().unwrap_or(0.0))?;
        }
    }
    writer.finalize()?;

    Ok(())
}
