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

//! A single playback voice.
//!
//! Handles pitch-shifted playback, the gain envelope and the short fade of a stolen note.

use std::sync::Arc;

use super::bank::SampleSound;
use super::handoff::Retirement;

/// Frames over which a stolen note fades out while the new note starts.
pub(crate) const STEAL_FADE_FRAMES: u32 = 32;

/// Shortest release fade, regardless of the sound's release time.
pub(crate) const MIN_RELEASE_SECONDS: f32 = 0.003;

/// Envelope stage of a voice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Stage {
    Idle,
    Decay { remaining: u32 },
    Sustain,
    Release { remaining: u32 },
}

/// Returns how far the read position moves per output frame for a note.
pub(crate) fn playback_step(note: u8, root_note: u8, sound_rate: u32, output_rate: u32) -> f64 {
    let semitones = note as f64 - root_note as f64;
    2f64.powf(semitones / 12.0) * sound_rate as f64 / output_rate as f64
}

/// Number of frames a release fade lasts.
fn release_frames(release_seconds: f32, output_rate: u32) -> u32 {
    (release_seconds.max(MIN_RELEASE_SECONDS) * output_rate as f32)
        .ceil()
        .max(1.0) as u32
}

/// Read position into a sound.
struct Playhead {
    sound: Arc<SampleSound>,
    position: f64,
    step: f64,
}

impl Playhead {
    /// Returns the linearly interpolated sample at the current position and advances,
    /// or None once the position is past the end of the data.
    fn next(&mut self) -> Option<f32> {
        let data = self.sound.data();
        let index = self.position as usize;
        if index >= data.len() {
            return None;
        }

        let frac = (self.position - index as f64) as f32;
        let s0 = data[index];
        let s1 = data.get(index + 1).copied().unwrap_or(s0);
        self.position += self.step;
        Some(s0 + (s1 - s0) * frac)
    }
}

/// The fading remainder of a note whose voice was stolen.
struct Tail {
    playhead: Playhead,
    gain: f32,
    gain_step: f32,
    remaining: u32,
}

/// A voice from the fixed pool. Idle when it has no playhead.
pub(crate) struct Voice {
    playhead: Option<Playhead>,
    note: u8,
    channel: u8,
    velocity: f32,
    amplitude: f32,
    amplitude_step: f32,
    sustain_gain: f32,
    release_seconds: f32,
    stage: Stage,
    /// Activation order, used to find the oldest voice when stealing.
    serial: u64,
    tail: Option<Tail>,
}

impl Voice {
    /// Creates an idle voice.
    pub(crate) fn new() -> Self {
        Self {
            playhead: None,
            note: 0,
            channel: 0,
            velocity: 0.0,
            amplitude: 0.0,
            amplitude_step: 0.0,
            sustain_gain: 0.0,
            release_seconds: 0.0,
            stage: Stage::Idle,
            serial: 0,
            tail: None,
        }
    }

    /// Returns true if the voice is bound to a note.
    pub(crate) fn is_active(&self) -> bool {
        self.playhead.is_some()
    }

    /// Returns true if the voice produces any audio, including a stolen note's fade.
    pub(crate) fn is_sounding(&self) -> bool {
        self.playhead.is_some() || self.tail.is_some()
    }

    /// Returns true if the voice is fading out after a note off.
    pub(crate) fn is_releasing(&self) -> bool {
        matches!(self.stage, Stage::Release { .. })
    }

    /// Checks if this voice should respond to a note off for the channel and note.
    pub(crate) fn matches(&self, channel: u8, note: u8) -> bool {
        self.is_active() && !self.is_releasing() && self.channel == channel && self.note == note
    }

    pub(crate) fn channel(&self) -> u8 {
        self.channel
    }

    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }

    /// Gets the sound the voice is playing.
    pub(crate) fn sound(&self) -> Option<&Arc<SampleSound>> {
        self.playhead.as_ref().map(|playhead| &playhead.sound)
    }

    /// Binds the voice to a new note. If the voice was already playing, the previous
    /// note keeps sounding as a short fade.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn start(
        &mut self,
        sound: Arc<SampleSound>,
        note: u8,
        channel: u8,
        velocity: f32,
        output_rate: u32,
        serial: u64,
        retirement: &Retirement,
    ) {
        if let Some(previous) = self.playhead.take() {
            let gain = self.amplitude * self.velocity;
            let tail = Tail {
                playhead: previous,
                gain,
                gain_step: gain / STEAL_FADE_FRAMES as f32,
                remaining: STEAL_FADE_FRAMES,
            };
            if let Some(replaced) = self.tail.replace(tail) {
                retirement.sound(replaced.playhead.sound);
            }
        }

        let envelope = *sound.envelope();
        // The first frame always plays at the start gain, even with no decay.
        let decay_frames = ((envelope.decay_seconds * output_rate as f32).round() as u32).max(1);
        self.amplitude = envelope.start_gain;
        self.amplitude_step = (envelope.sustain_gain - envelope.start_gain) / decay_frames as f32;
        self.stage = Stage::Decay {
            remaining: decay_frames,
        };

        let step = playback_step(note, sound.root_note(), sound.sample_rate(), output_rate);
        self.playhead = Some(Playhead {
            sound,
            position: 0.0,
            step,
        });
        self.note = note;
        self.channel = channel;
        self.velocity = velocity;
        self.sustain_gain = envelope.sustain_gain;
        self.release_seconds = envelope.release_seconds;
        self.serial = serial;
    }

    /// Starts the release fade from the current amplitude.
    pub(crate) fn release(&mut self, output_rate: u32) {
        if matches!(self.stage, Stage::Decay { .. } | Stage::Sustain) {
            let frames = release_frames(self.release_seconds, output_rate);
            self.amplitude_step = self.amplitude / frames as f32;
            self.stage = Stage::Release { remaining: frames };
        }
    }

    /// Silences the voice immediately, including any stolen-note fade.
    pub(crate) fn stop(&mut self, retirement: &Retirement) {
        if let Some(tail) = self.tail.take() {
            retirement.sound(tail.playhead.sound);
        }
        self.finish(retirement);
    }

    /// Adds the voice's output for frames `start..end` into an interleaved buffer,
    /// writing the same signal to every channel.
    pub(crate) fn render(
        &mut self,
        output: &mut [f32],
        channels: usize,
        start: usize,
        end: usize,
        retirement: &Retirement,
    ) {
        for frame in output[start * channels..end * channels].chunks_exact_mut(channels) {
            let value = self.next_tail_value(retirement) + self.next_value(retirement);
            for sample in frame.iter_mut() {
                *sample += value;
            }
            if !self.is_sounding() {
                break;
            }
        }
    }

    fn next_value(&mut self, retirement: &Retirement) -> f32 {
        let Some(playhead) = self.playhead.as_mut() else {
            return 0.0;
        };
        let Some(sample) = playhead.next() else {
            self.finish(retirement);
            return 0.0;
        };

        let value = sample * self.amplitude * self.velocity;
        self.advance_envelope(retirement);
        value
    }

    fn next_tail_value(&mut self, retirement: &Retirement) -> f32 {
        let Some(tail) = self.tail.as_mut() else {
            return 0.0;
        };
        if tail.remaining > 0 {
            if let Some(sample) = tail.playhead.next() {
                let value = sample * tail.gain;
                tail.gain = (tail.gain - tail.gain_step).max(0.0);
                tail.remaining -= 1;
                return value;
            }
        }

        if let Some(tail) = self.tail.take() {
            retirement.sound(tail.playhead.sound);
        }
        0.0
    }

    fn advance_envelope(&mut self, retirement: &Retirement) {
        match self.stage {
            Stage::Decay { remaining } if remaining <= 1 => {
                self.amplitude = self.sustain_gain;
                self.stage = Stage::Sustain;
            }
            Stage::Decay { remaining } => {
                self.amplitude += self.amplitude_step;
                self.stage = Stage::Decay {
                    remaining: remaining - 1,
                };
            }
            Stage::Release { remaining } if remaining <= 1 => {
                self.finish(retirement);
            }
            Stage::Release { remaining } => {
                self.amplitude = (self.amplitude - self.amplitude_step).max(0.0);
                self.stage = Stage::Release {
                    remaining: remaining - 1,
                };
            }
            Stage::Sustain | Stage::Idle => {}
        }
    }

    fn finish(&mut self, retirement: &Retirement) {
        if let Some(playhead) = self.playhead.take() {
            retirement.sound(playhead.sound);
        }
        self.stage = Stage::Idle;
        self.amplitude = 0.0;
        self.amplitude_step = 0.0;
    }
}

#[cfg(test)]
impl Voice {
    pub(crate) fn note(&self) -> u8 {
        self.note
    }

    pub(crate) fn stage(&self) -> Stage {
        self.stage
    }
}

impl std::fmt::Debug for Voice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Voice")
            .field("note", &self.note)
            .field("channel", &self.channel)
            .field("stage", &self.stage)
            .field("amplitude", &self.amplitude)
            .field("tail", &self.tail.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samples::bank::{DecodedSample, Envelope, SampleBank};
    use crate::samples::handoff::{EngineStats, Retired};
    use crate::testutil::{constant_sample, test_envelope};
    use crossbeam_channel::Receiver;

    fn retirement() -> (Retirement, Receiver<Retired>) {
        Retirement::channel(64, Arc::new(EngineStats::default()))
    }

    fn sound(sample: DecodedSample, root: u8, envelope: Envelope) -> Arc<SampleSound> {
        SampleBank::new(60.0)
            .add_sound("test", sample, 0, 127, root, envelope)
            .unwrap()
    }

    fn flat_envelope(gain: f32, release_seconds: f32) -> Envelope {
        Envelope {
            start_gain: gain,
            sustain_gain: gain,
            decay_seconds: 0.0,
            release_seconds,
        }
    }

    #[test]
    fn test_playback_step() {
        assert_eq!(playback_step(60, 60, 44100, 44100), 1.0);
        assert!((playback_step(72, 60, 44100, 44100) - 2.0).abs() < 1e-12);
        assert!((playback_step(48, 60, 44100, 44100) - 0.5).abs() < 1e-12);
        assert!((playback_step(60, 60, 22050, 44100) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_interpolated_playback() {
        let (retirement, _rx) = retirement();
        let sound = sound(
            DecodedSample::new(vec![0.0, 1.0], 1000),
            60,
            flat_envelope(1.0, 0.0),
        );

        // An octave down reads at half speed.
        let mut voice = Voice::new();
        voice.start(sound, 48, 1, 1.0, 1000, 1, &retirement);

        let mut output = vec![0.0f32; 8];
        voice.render(&mut output, 1, 0, 8, &retirement);

        assert_eq!(&output[..4], &[0.0, 0.5, 1.0, 1.0]);
        assert!(output[4..].iter().all(|&s| s == 0.0));
        assert!(!voice.is_active());
    }

    #[test]
    fn test_writes_every_channel() {
        let (retirement, _rx) = retirement();
        let sound = sound(constant_sample(0.5, 100, 1000), 60, flat_envelope(1.0, 0.0));

        let mut voice = Voice::new();
        voice.start(sound, 60, 1, 0.5, 1000, 1, &retirement);

        let mut output = vec![0.0f32; 6];
        voice.render(&mut output, 2, 0, 3, &retirement);
        assert!(output.iter().all(|&s| s == 0.25));
    }

    #[test]
    fn test_decay_reaches_sustain() {
        let (retirement, _rx) = retirement();
        let envelope = Envelope {
            start_gain: 1.0,
            sustain_gain: 0.5,
            decay_seconds: 0.01,
            release_seconds: 0.0,
        };
        let sound = sound(constant_sample(1.0, 1000, 1000), 60, envelope);

        let mut voice = Voice::new();
        voice.start(sound, 60, 1, 1.0, 1000, 1, &retirement);

        let mut output = vec![0.0f32; 20];
        voice.render(&mut output, 1, 0, 20, &retirement);

        assert_eq!(output[0], 1.0);
        assert!(output.windows(2).all(|w| w[1] <= w[0]));
        assert!((output[15] - 0.5).abs() < 1e-6);
        assert_eq!(voice.stage(), Stage::Sustain);
    }

    #[test]
    fn test_zero_decay_starts_at_start_gain() {
        let (retirement, _rx) = retirement();
        let envelope = Envelope {
            start_gain: 1.0,
            sustain_gain: 0.25,
            decay_seconds: 0.0,
            release_seconds: 0.0,
        };
        let sound = sound(constant_sample(1.0, 1000, 1000), 60, envelope);

        let mut voice = Voice::new();
        voice.start(sound, 60, 1, 1.0, 1000, 1, &retirement);

        let mut output = vec![0.0f32; 4];
        voice.render(&mut output, 1, 0, 4, &retirement);

        assert_eq!(output, vec![1.0, 0.25, 0.25, 0.25]);
        assert_eq!(voice.stage(), Stage::Sustain);
    }

    #[test]
    fn test_release_fades_to_silence() {
        let (retirement, rx) = retirement();
        let sound = sound(constant_sample(1.0, 10_000, 1000), 60, flat_envelope(0.8, 0.1));

        let mut voice = Voice::new();
        voice.start(sound, 60, 3, 1.0, 1000, 1, &retirement);
        assert!(voice.matches(3, 60));
        assert!(!voice.matches(4, 60));
        assert!(!voice.matches(3, 61));

        voice.release(1000);
        assert!(voice.is_releasing());
        assert!(!voice.matches(3, 60));

        let mut output = vec![0.0f32; 200];
        voice.render(&mut output, 1, 0, 200, &retirement);

        assert!((output[0] - 0.8).abs() < 1e-6);
        assert!(output[..100].windows(2).all(|w| w[1] < w[0]));
        assert!(output[100..].iter().all(|&s| s == 0.0));
        assert!(!voice.is_active());

        // The sound was handed back for deallocation off the audio thread.
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn test_release_has_minimum_length() {
        let (retirement, _rx) = retirement();
        let sound = sound(constant_sample(1.0, 10_000, 48000), 60, test_envelope());

        let mut voice = Voice::new();
        let envelope_release = sound.envelope().release_seconds;
        assert!(envelope_release < MIN_RELEASE_SECONDS);
        voice.start(sound, 60, 1, 1.0, 48000, 1, &retirement);
        voice.release(48000);

        let mut output = vec![0.0f32; 200];
        voice.render(&mut output, 1, 0, 200, &retirement);

        let min_frames = (MIN_RELEASE_SECONDS * 48000.0) as usize;
        assert!(output[..min_frames - 1].iter().all(|&s| s > 0.0));
        assert!(output[min_frames + 1..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_stolen_note_fades_out() {
        let (retirement, rx) = retirement();
        let first = sound(constant_sample(1.0, 10_000, 1000), 60, flat_envelope(1.0, 0.5));
        let second = sound(constant_sample(0.0, 10_000, 1000), 60, flat_envelope(1.0, 0.5));

        let mut voice = Voice::new();
        voice.start(first, 60, 1, 1.0, 1000, 1, &retirement);
        voice.start(second, 62, 1, 1.0, 1000, 2, &retirement);
        assert_eq!(voice.note(), 62);
        assert_eq!(voice.serial(), 2);

        let mut output = vec![0.0f32; 64];
        voice.render(&mut output, 1, 0, 64, &retirement);

        // Only the old note contributes, fading over the steal window.
        assert_eq!(output[0], 1.0);
        let fade = STEAL_FADE_FRAMES as usize;
        assert!(output[..fade].windows(2).all(|w| w[1] < w[0]));
        assert!(output[fade..].iter().all(|&s| s == 0.0));
        assert_eq!(rx.try_iter().count(), 1);
        assert!(voice.is_active());
    }

    #[test]
    fn test_stop_is_immediate() {
        let (retirement, rx) = retirement();
        let sound = sound(constant_sample(1.0, 100, 1000), 60, flat_envelope(1.0, 0.5));

        let mut voice = Voice::new();
        voice.start(sound, 60, 1, 1.0, 1000, 1, &retirement);
        voice.stop(&retirement);

        assert!(!voice.is_sounding());
        assert_eq!(voice.stage(), Stage::Idle);
        assert_eq!(rx.try_iter().count(), 1);

        let mut output = vec![0.0f32; 10];
        voice.render(&mut output, 1, 0, 10, &retirement);
        assert!(output.iter().all(|&s| s == 0.0));
    }
}
