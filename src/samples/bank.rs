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

//! The sample bank: decoded sounds mapped onto MIDI note ranges.
//!
//! The bank lives on the control thread. The audio thread only ever sees immutable
//! [`BankSnapshot`]s, and voices hold their sound through an `Arc`, so removing a sound
//! from the bank never pulls audio out from under a playing voice.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::{check_parameter, ConfigError};

/// Highest valid MIDI note number.
pub const MAX_NOTE: u8 = 127;

/// A mono audio buffer handed over by a decoder.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedSample {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl DecodedSample {
    /// Creates a decoded sample from mono samples at the given rate.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Gets the samples.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Gets the sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Gets the duration of the audio.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// Gain envelope endpoints for a sound.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Envelope {
    /// Gain at the first sample of a note.
    pub start_gain: f32,
    /// Gain held while the note is down, reached after `decay_seconds`.
    pub sustain_gain: f32,
    /// Time to move linearly from `start_gain` to `sustain_gain`. With zero, only the
    /// first frame plays at `start_gain`.
    pub decay_seconds: f32,
    /// Time to fade to silence after note off.
    pub release_seconds: f32,
}

impl Envelope {
    /// Checks that every value is finite and non-negative.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_parameter("start_gain", self.start_gain as f64)?;
        check_parameter("sustain_gain", self.sustain_gain as f64)?;
        check_parameter("decay_seconds", self.decay_seconds as f64)?;
        check_parameter("release_seconds", self.release_seconds as f64)?;
        Ok(())
    }
}

/// An immutable sound mapped to a note range.
#[derive(Debug)]
pub struct SampleSound {
    name: String,
    data: Box<[f32]>,
    sample_rate: u32,
    low_note: u8,
    high_note: u8,
    root_note: u8,
    envelope: Envelope,
}

impl SampleSound {
    /// Validates the parameters and builds a sound, truncating the audio to `max_frames`.
    fn new(
        name: &str,
        sample: DecodedSample,
        low_note: u8,
        high_note: u8,
        root_note: u8,
        envelope: Envelope,
        max_frames: usize,
    ) -> Result<Self, ConfigError> {
        if low_note > high_note || high_note > MAX_NOTE {
            return Err(ConfigError::InvalidRange {
                low: low_note,
                high: high_note,
            });
        }
        if root_note > MAX_NOTE {
            return Err(ConfigError::InvalidRootNote(root_note));
        }
        if sample.sample_rate == 0 {
            return Err(ConfigError::InvalidSampleRate);
        }
        if sample.samples.is_empty() {
            return Err(ConfigError::EmptySample);
        }
        envelope.validate()?;

        let mut samples = sample.samples;
        if samples.len() > max_frames {
            debug!(
                name,
                frames = samples.len(),
                max_frames,
                "Truncating sound to maximum length"
            );
            samples.truncate(max_frames.max(1));
        }

        Ok(Self {
            name: name.to_string(),
            data: samples.into_boxed_slice(),
            sample_rate: sample.sample_rate,
            low_note,
            high_note,
            root_note,
            envelope,
        })
    }

    /// Returns true if the note falls inside this sound's range.
    pub fn applies_to_note(&self, note: u8) -> bool {
        (self.low_note..=self.high_note).contains(&note)
    }

    /// Gets the name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the mono sample data.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Gets the native sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Gets the inclusive note range.
    pub fn note_range(&self) -> (u8, u8) {
        (self.low_note, self.high_note)
    }

    /// Gets the root note.
    pub fn root_note(&self) -> u8 {
        self.root_note
    }

    /// Gets the envelope.
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Returns the memory size in bytes.
    pub fn memory_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }
}

/// An immutable view of the bank as published to the audio thread.
#[derive(Debug, Default)]
pub struct BankSnapshot {
    generation: u64,
    sounds: Vec<Arc<SampleSound>>,
}

impl BankSnapshot {
    /// Gets the generation this snapshot was published with. The initial empty
    /// snapshot is generation 0.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Finds the sound covering the note. Later registrations win over earlier ones.
    pub fn find_sound(&self, note: u8) -> Option<&Arc<SampleSound>> {
        self.sounds
            .iter()
            .rev()
            .find(|sound| sound.applies_to_note(note))
    }

    /// Returns true if this exact sound is part of the snapshot.
    pub fn contains(&self, sound: &Arc<SampleSound>) -> bool {
        self.sounds.iter().any(|s| Arc::ptr_eq(s, sound))
    }

    /// Gets the number of sounds.
    pub fn len(&self) -> usize {
        self.sounds.len()
    }

    /// Returns true if there are no sounds.
    pub fn is_empty(&self) -> bool {
        self.sounds.is_empty()
    }
}

/// The mutable set of sounds, owned by the control side.
pub struct SampleBank {
    sounds: Vec<Arc<SampleSound>>,
    max_sample_seconds: f64,
}

impl SampleBank {
    /// Creates an empty bank. Sounds longer than `max_sample_seconds` are truncated.
    pub fn new(max_sample_seconds: f64) -> Self {
        Self {
            sounds: Vec::new(),
            max_sample_seconds,
        }
    }

    /// Removes all sounds. Voices still playing one of them keep it alive until they
    /// finish.
    pub fn clear(&mut self) {
        if !self.sounds.is_empty() {
            info!(sounds = self.sounds.len(), "Clearing sample bank");
        }
        self.sounds.clear();
    }

    /// Registers a new sound. On error the bank is left untouched.
    pub fn add_sound(
        &mut self,
        name: &str,
        sample: DecodedSample,
        low_note: u8,
        high_note: u8,
        root_note: u8,
        envelope: Envelope,
    ) -> Result<Arc<SampleSound>, ConfigError> {
        let max_frames = (self.max_sample_seconds * sample.sample_rate as f64) as usize;
        let sound = Arc::new(SampleSound::new(
            name, sample, low_note, high_note, root_note, envelope, max_frames,
        )?);

        info!(
            name,
            low_note,
            high_note,
            root_note,
            sample_rate = sound.sample_rate(),
            frames = sound.data().len(),
            memory_kb = sound.memory_size() / 1024,
            "Sound added to bank"
        );
        self.sounds.push(sound.clone());
        Ok(sound)
    }

    /// Finds the sound covering the note. Later registrations win over earlier ones.
    pub fn find_sound(&self, note: u8) -> Option<&SampleSound> {
        self.sounds
            .iter()
            .rev()
            .find(|sound| sound.applies_to_note(note))
            .map(|sound| sound.as_ref())
    }

    /// Builds an immutable snapshot of the current sounds.
    pub fn snapshot(&self, generation: u64) -> BankSnapshot {
        BankSnapshot {
            generation,
            sounds: self.sounds.clone(),
        }
    }

    /// Gets the registered sounds in registration order.
    pub fn sounds(&self) -> impl Iterator<Item = &SampleSound> {
        self.sounds.iter().map(|sound| sound.as_ref())
    }

    /// Gets the maximum sound length in seconds.
    pub fn max_sample_seconds(&self) -> f64 {
        self.max_sample_seconds
    }

    /// Gets the number of sounds.
    pub fn len(&self) -> usize {
        self.sounds.len()
    }

    /// Returns true if there are no sounds.
    pub fn is_empty(&self) -> bool {
        self.sounds.is_empty()
    }

    /// Returns the total memory used by the sounds.
    pub fn memory_usage(&self) -> usize {
        self.sounds.iter().map(|sound| sound.memory_size()).sum()
    }
}

impl std::fmt::Debug for SampleBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleBank")
            .field("sounds", &self.sounds.len())
            .field("max_sample_seconds", &self.max_sample_seconds)
            .field("memory_kb", &(self.memory_usage() / 1024))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{constant_sample, test_envelope};

    fn bank() -> SampleBank {
        SampleBank::new(60.0)
    }

    #[test]
    fn test_add_and_find() {
        let mut bank = bank();
        bank.add_sound(
            "e1",
            constant_sample(0.5, 100, 44100),
            52,
            52,
            52,
            test_envelope(),
        )
        .unwrap();

        assert_eq!(bank.len(), 1);
        assert_eq!(bank.find_sound(52).map(|s| s.name()), Some("e1"));
        assert!(bank.find_sound(51).is_none());
        assert!(bank.find_sound(53).is_none());
    }

    #[test]
    fn test_invalid_ranges() {
        let mut bank = bank();

        let result = bank.add_sound(
            "bad",
            constant_sample(0.5, 100, 44100),
            60,
            52,
            52,
            test_envelope(),
        );
        assert!(matches!(
            result,
            Err(ConfigError::InvalidRange { low: 60, high: 52 })
        ));

        let result = bank.add_sound(
            "bad",
            constant_sample(0.5, 100, 44100),
            0,
            128,
            52,
            test_envelope(),
        );
        assert!(matches!(result, Err(ConfigError::InvalidRange { .. })));

        let result = bank.add_sound(
            "bad",
            constant_sample(0.5, 100, 44100),
            0,
            127,
            200,
            test_envelope(),
        );
        assert!(matches!(result, Err(ConfigError::InvalidRootNote(200))));

        // Failed registrations leave the bank untouched.
        assert!(bank.is_empty());
    }

    #[test]
    fn test_invalid_audio() {
        let mut bank = bank();

        let result = bank.add_sound(
            "empty",
            DecodedSample::new(Vec::new(), 44100),
            0,
            127,
            60,
            test_envelope(),
        );
        assert!(matches!(result, Err(ConfigError::EmptySample)));

        let result = bank.add_sound(
            "norate",
            DecodedSample::new(vec![0.1; 10], 0),
            0,
            127,
            60,
            test_envelope(),
        );
        assert!(matches!(result, Err(ConfigError::InvalidSampleRate)));

        let envelope = Envelope {
            release_seconds: -1.0,
            ..test_envelope()
        };
        let result = bank.add_sound(
            "negative",
            constant_sample(0.5, 100, 44100),
            0,
            127,
            60,
            envelope,
        );
        assert!(matches!(
            result,
            Err(ConfigError::InvalidParameter {
                name: "release_seconds",
                ..
            })
        ));
    }

    #[test]
    fn test_last_registered_wins() {
        let mut bank = bank();
        bank.add_sound(
            "wide",
            constant_sample(0.5, 100, 44100),
            40,
            80,
            60,
            test_envelope(),
        )
        .unwrap();
        bank.add_sound(
            "narrow",
            constant_sample(0.5, 100, 44100),
            58,
            62,
            60,
            test_envelope(),
        )
        .unwrap();

        assert_eq!(bank.find_sound(60).map(|s| s.name()), Some("narrow"));
        assert_eq!(bank.find_sound(45).map(|s| s.name()), Some("wide"));

        let snapshot = bank.snapshot(1);
        assert_eq!(snapshot.find_sound(60).map(|s| s.name()), Some("narrow"));
        assert_eq!(snapshot.find_sound(45).map(|s| s.name()), Some("wide"));
        assert!(snapshot.find_sound(81).is_none());
    }

    #[test]
    fn test_clear() {
        let mut bank = bank();
        let sound = bank
            .add_sound(
                "e1",
                constant_sample(0.5, 100, 44100),
                52,
                52,
                52,
                test_envelope(),
            )
            .unwrap();
        let snapshot = bank.snapshot(1);

        bank.clear();
        assert!(bank.is_empty());
        assert!(bank.find_sound(52).is_none());

        // Snapshots and outstanding references are unaffected.
        assert!(snapshot.contains(&sound));
        assert_eq!(sound.data().len(), 100);
    }

    #[test]
    fn test_truncates_long_sounds() {
        let mut bank = SampleBank::new(1.0);
        let sound = bank
            .add_sound(
                "long",
                constant_sample(0.5, 3000, 1000),
                0,
                127,
                60,
                test_envelope(),
            )
            .unwrap();
        assert_eq!(sound.data().len(), 1000);
        assert_eq!(bank.memory_usage(), 1000 * 4);
    }

    #[test]
    fn test_snapshot_contains_by_identity() {
        let mut bank = bank();
        let first = bank
            .add_sound(
                "a",
                constant_sample(0.5, 10, 44100),
                0,
                127,
                60,
                test_envelope(),
            )
            .unwrap();
        let snapshot = bank.snapshot(7);
        assert_eq!(snapshot.generation(), 7);
        assert_eq!(snapshot.len(), 1);

        let mut other = SampleBank::new(60.0);
        let lookalike = other
            .add_sound(
                "a",
                constant_sample(0.5, 10, 44100),
                0,
                127,
                60,
                test_envelope(),
            )
            .unwrap();

        assert!(snapshot.contains(&first));
        assert!(!snapshot.contains(&lookalike));
    }

    #[test]
    fn test_decoded_sample_duration() {
        let sample = constant_sample(0.1, 22050, 44100);
        assert_eq!(sample.duration(), Duration::from_millis(500));
        assert_eq!(DecodedSample::new(vec![1.0], 0).duration(), Duration::ZERO);
    }
}
