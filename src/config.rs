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

//! Sampler configuration.
//!
//! Configuration is read from YAML through the `config` crate and can be overridden with
//! `LOWFAT_*` environment variables (e.g. `LOWFAT_POLYPHONY=16`).

use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::samples::Envelope;

mod error;

pub use error::ConfigError;
pub(crate) use error::check_parameter;

/// Default number of simultaneous voices.
pub const DEFAULT_POLYPHONY: usize = 8;

/// Default gain applied when a note starts.
pub const DEFAULT_START_GAIN: f32 = 1.0;

/// Default gain held while a note is sustained.
pub const DEFAULT_SUSTAIN_GAIN: f32 = 0.6;

/// Default time to move from the start gain to the sustain gain.
pub const DEFAULT_DECAY_SECONDS: f32 = 0.05;

/// Default fade-out time after a note off.
pub const DEFAULT_RELEASE_SECONDS: f32 = 0.6;

/// Default number of note events a single block can carry.
pub const DEFAULT_MAX_EVENTS_PER_BLOCK: usize = 1024;

/// Default upper bound on the length of a single sound.
pub const DEFAULT_MAX_SAMPLE_SECONDS: f64 = 60.0;

/// Prefix for environment variable overrides.
const ENV_PREFIX: &str = "LOWFAT";

/// What to do when a note arrives and every voice is busy.
#[derive(Deserialize, Clone, Copy, Serialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VoiceStealing {
    /// Reclaim the voice that was activated longest ago.
    #[default]
    Oldest,
    /// Drop the incoming note.
    Disabled,
}

/// How rendered audio is combined with the output buffer.
#[derive(Deserialize, Clone, Copy, Serialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Clear the buffer before rendering.
    #[default]
    Replace,
    /// Add to whatever the host already put in the buffer.
    Mix,
}

/// The sampler configuration.
#[derive(Deserialize, Clone, Serialize, Debug)]
pub struct SamplerConfig {
    /// Maximum number of simultaneous voices.
    #[serde(default = "default_polyphony")]
    polyphony: usize,

    /// Default gain at note start for sounds that don't override it.
    #[serde(default = "default_start_gain")]
    start_gain: f32,

    /// Default sustain gain for sounds that don't override it.
    #[serde(default = "default_sustain_gain")]
    sustain_gain: f32,

    /// Default decay time in seconds.
    #[serde(default = "default_decay_seconds")]
    decay_seconds: f32,

    /// Default release time in seconds.
    #[serde(default = "default_release_seconds")]
    release_seconds: f32,

    /// Voice stealing policy.
    #[serde(default)]
    voice_stealing: VoiceStealing,

    /// Output buffer handling.
    #[serde(default)]
    output_mode: OutputMode,

    /// Capacity of the per-block event scratch list.
    #[serde(default = "default_max_events_per_block")]
    max_events_per_block: usize,

    /// Sounds longer than this are truncated when registered.
    #[serde(default = "default_max_sample_seconds")]
    max_sample_seconds: f64,

    /// Sounds to load into the bank.
    #[serde(default)]
    sounds: Vec<SoundDefinition>,
}

fn default_polyphony() -> usize {
    DEFAULT_POLYPHONY
}

fn default_start_gain() -> f32 {
    DEFAULT_START_GAIN
}

fn default_sustain_gain() -> f32 {
    DEFAULT_SUSTAIN_GAIN
}

fn default_decay_seconds() -> f32 {
    DEFAULT_DECAY_SECONDS
}

fn default_release_seconds() -> f32 {
    DEFAULT_RELEASE_SECONDS
}

fn default_max_events_per_block() -> usize {
    DEFAULT_MAX_EVENTS_PER_BLOCK
}

fn default_max_sample_seconds() -> f64 {
    DEFAULT_MAX_SAMPLE_SECONDS
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            polyphony: DEFAULT_POLYPHONY,
            start_gain: DEFAULT_START_GAIN,
            sustain_gain: DEFAULT_SUSTAIN_GAIN,
            decay_seconds: DEFAULT_DECAY_SECONDS,
            release_seconds: DEFAULT_RELEASE_SECONDS,
            voice_stealing: VoiceStealing::default(),
            output_mode: OutputMode::default(),
            max_events_per_block: DEFAULT_MAX_EVENTS_PER_BLOCK,
            max_sample_seconds: DEFAULT_MAX_SAMPLE_SECONDS,
            sounds: Vec::new(),
        }
    }
}

impl SamplerConfig {
    /// Loads the configuration from a YAML file, applying environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        info!(path = ?path, "Loading sampler configuration");
        let config: SamplerConfig = Config::builder()
            .add_source(File::from(path))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;
        config.validate()?;

        debug!(
            polyphony = config.polyphony,
            voice_stealing = ?config.voice_stealing,
            sounds = config.sounds.len(),
            "Sampler configuration loaded"
        );
        Ok(config)
    }

    /// Parses the configuration from a YAML string. Environment overrides are not applied.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: SamplerConfig = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every value that can't be expressed in the type system.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.polyphony == 0 {
            return Err(ConfigError::InvalidPolyphony);
        }
        if self.max_events_per_block == 0 {
            return Err(ConfigError::InvalidMaxEvents);
        }
        self.envelope().validate()?;
        check_parameter("max_sample_seconds", self.max_sample_seconds)?;
        for sound in &self.sounds {
            sound.validate()?;
        }
        Ok(())
    }

    /// Gets the polyphony.
    pub fn polyphony(&self) -> usize {
        self.polyphony
    }

    /// Gets the voice stealing policy.
    pub fn voice_stealing(&self) -> VoiceStealing {
        self.voice_stealing
    }

    /// Gets the output mode.
    pub fn output_mode(&self) -> OutputMode {
        self.output_mode
    }

    /// Gets the per-block event capacity.
    pub fn max_events_per_block(&self) -> usize {
        self.max_events_per_block
    }

    /// Gets the maximum sound length in seconds.
    pub fn max_sample_seconds(&self) -> f64 {
        self.max_sample_seconds
    }

    /// Gets the configured sounds.
    pub fn sounds(&self) -> &[SoundDefinition] {
        &self.sounds
    }

    /// The envelope used by sounds that don't override it.
    pub fn envelope(&self) -> Envelope {
        Envelope {
            start_gain: self.start_gain,
            sustain_gain: self.sustain_gain,
            decay_seconds: self.decay_seconds,
            release_seconds: self.release_seconds,
        }
    }

    /// Sets the polyphony.
    pub fn with_polyphony(mut self, polyphony: usize) -> Self {
        self.polyphony = polyphony;
        self
    }

    /// Sets the voice stealing policy.
    pub fn with_voice_stealing(mut self, voice_stealing: VoiceStealing) -> Self {
        self.voice_stealing = voice_stealing;
        self
    }

    /// Sets the output mode.
    pub fn with_output_mode(mut self, output_mode: OutputMode) -> Self {
        self.output_mode = output_mode;
        self
    }

    /// Replaces the configured sounds.
    pub fn with_sounds(mut self, sounds: Vec<SoundDefinition>) -> Self {
        self.sounds = sounds;
        self
    }

    /// Sets the per-block event capacity.
    pub fn with_max_events_per_block(mut self, max_events_per_block: usize) -> Self {
        self.max_events_per_block = max_events_per_block;
        self
    }
}

/// A YAML representation of a sound mapped into the bank.
#[derive(Deserialize, Clone, Serialize, Debug)]
pub struct SoundDefinition {
    /// Display name. Defaults to the file name.
    name: Option<String>,

    /// The audio file, relative to the config file's directory unless absolute.
    file: String,

    /// The note at which the file plays at its recorded pitch.
    root: u8,

    /// Lowest mapped note. Defaults to the root note.
    low: Option<u8>,

    /// Highest mapped note. Defaults to the root note.
    high: Option<u8>,

    start_gain: Option<f32>,
    sustain_gain: Option<f32>,
    decay_seconds: Option<f32>,
    release_seconds: Option<f32>,
}

impl SoundDefinition {
    /// Creates a sound definition with the default envelope.
    pub fn new(file: String, root: u8, low: Option<u8>, high: Option<u8>) -> Self {
        Self {
            name: None,
            file,
            root,
            low,
            high,
            start_gain: None,
            sustain_gain: None,
            decay_seconds: None,
            release_seconds: None,
        }
    }

    /// Gets the name of the sound, falling back to the file name.
    pub fn name(&self) -> &str {
        match &self.name {
            Some(name) => name,
            None => Path::new(&self.file)
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or(&self.file),
        }
    }

    /// Gets the file as written in the config.
    pub fn file(&self) -> &str {
        &self.file
    }

    /// Resolves the file against the given base path.
    pub fn resolve_file(&self, base_path: &Path) -> PathBuf {
        let file = Path::new(&self.file);
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            base_path.join(file)
        }
    }

    /// Gets the root note.
    pub fn root(&self) -> u8 {
        self.root
    }

    /// Gets the inclusive note range.
    pub fn range(&self) -> (u8, u8) {
        (
            self.low.unwrap_or(self.root),
            self.high.unwrap_or(self.root),
        )
    }

    /// The envelope for this sound, layered over the given defaults.
    pub fn envelope(&self, defaults: Envelope) -> Envelope {
        Envelope {
            start_gain: self.start_gain.unwrap_or(defaults.start_gain),
            sustain_gain: self.sustain_gain.unwrap_or(defaults.sustain_gain),
            decay_seconds: self.decay_seconds.unwrap_or(defaults.decay_seconds),
            release_seconds: self.release_seconds.unwrap_or(defaults.release_seconds),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.root > 127 {
            return Err(ConfigError::InvalidRootNote(self.root));
        }
        let (low, high) = self.range();
        if low > high || high > 127 {
            return Err(ConfigError::InvalidRange { low, high });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = SamplerConfig::from_yaml_str("{}").unwrap();

        assert_eq!(config.polyphony(), DEFAULT_POLYPHONY);
        assert_eq!(config.voice_stealing(), VoiceStealing::Oldest);
        assert_eq!(config.output_mode(), OutputMode::Replace);
        assert_eq!(config.max_events_per_block(), DEFAULT_MAX_EVENTS_PER_BLOCK);
        assert!(config.sounds().is_empty());

        let envelope = config.envelope();
        assert_eq!(envelope.start_gain, DEFAULT_START_GAIN);
        assert_eq!(envelope.sustain_gain, DEFAULT_SUSTAIN_GAIN);
        assert_eq!(envelope.release_seconds, DEFAULT_RELEASE_SECONDS);
        assert_eq!(envelope.release_seconds, 0.6);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
            polyphony: 2
            start_gain: 0.8
            sustain_gain: 0.5
            decay_seconds: 0.1
            release_seconds: 0.25
            voice_stealing: disabled
            output_mode: mix
            max_events_per_block: 64
            sounds:
              - file: bass/e1.wav
                root: 52
              - name: lead
                file: /samples/lead.wav
                root: 60
                low: 53
                high: 72
                release_seconds: 1.5
        "#;

        let config = SamplerConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.polyphony(), 2);
        assert_eq!(config.voice_stealing(), VoiceStealing::Disabled);
        assert_eq!(config.output_mode(), OutputMode::Mix);
        assert_eq!(config.max_events_per_block(), 64);

        let sounds = config.sounds();
        assert_eq!(sounds.len(), 2);
        assert_eq!(sounds[0].name(), "e1");
        assert_eq!(sounds[0].range(), (52, 52));
        assert_eq!(
            sounds[0].resolve_file(Path::new("/instruments")),
            PathBuf::from("/instruments/bass/e1.wav")
        );

        assert_eq!(sounds[1].name(), "lead");
        assert_eq!(sounds[1].range(), (53, 72));
        assert_eq!(
            sounds[1].resolve_file(Path::new("/instruments")),
            PathBuf::from("/samples/lead.wav")
        );

        let envelope = sounds[1].envelope(config.envelope());
        assert_eq!(envelope.start_gain, 0.8);
        assert_eq!(envelope.sustain_gain, 0.5);
        assert_eq!(envelope.release_seconds, 1.5);
    }

    #[test]
    fn test_zero_polyphony_rejected() {
        let result = SamplerConfig::from_yaml_str("polyphony: 0");
        assert!(matches!(result, Err(ConfigError::InvalidPolyphony)));
    }

    #[test]
    fn test_zero_max_events_rejected() {
        let result = SamplerConfig::from_yaml_str("max_events_per_block: 0");
        assert!(matches!(result, Err(ConfigError::InvalidMaxEvents)));

        let config = SamplerConfig::default().with_max_events_per_block(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidMaxEvents)
        ));
    }

    #[test]
    fn test_with_sounds() {
        let config = SamplerConfig::default().with_sounds(vec![SoundDefinition::new(
            "kit/snare.wav".to_string(),
            38,
            Some(37),
            None,
        )]);
        assert!(config.validate().is_ok());

        let sounds = config.sounds();
        assert_eq!(sounds.len(), 1);
        assert_eq!(sounds[0].name(), "snare");
        assert_eq!(sounds[0].range(), (37, 38));
        assert_eq!(sounds[0].envelope(config.envelope()), config.envelope());

        let config = config.with_sounds(vec![SoundDefinition::new(
            "kit/snare.wav".to_string(),
            38,
            Some(40),
            None,
        )]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRange { low: 40, high: 38 })
        ));
    }

    #[test]
    fn test_negative_gain_rejected() {
        let result = SamplerConfig::from_yaml_str("sustain_gain: -1.0");
        assert!(matches!(
            result,
            Err(ConfigError::InvalidParameter {
                name: "sustain_gain",
                ..
            })
        ));
    }

    #[test]
    fn test_bad_sound_range_rejected() {
        let yaml = r#"
            sounds:
              - file: a.wav
                root: 60
                low: 70
                high: 65
        "#;
        let result = SamplerConfig::from_yaml_str(yaml);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidRange { low: 70, high: 65 })
        ));
    }

    #[test]
    fn test_unknown_stealing_policy_rejected() {
        let result = SamplerConfig::from_yaml_str("voice_stealing: newest");
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    #[serial]
    fn test_load_with_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sampler.yaml");
        std::fs::write(&path, "polyphony: 4\nrelease_seconds: 0.2\n").unwrap();

        std::env::set_var("LOWFAT_POLYPHONY", "12");
        let result = SamplerConfig::load(&path);
        std::env::remove_var("LOWFAT_POLYPHONY");

        let config = result.unwrap();
        assert_eq!(config.polyphony(), 12);
        assert_eq!(config.envelope().release_seconds, 0.2);
    }

    #[test]
    #[serial]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = SamplerConfig::load(&dir.path().join("missing.yaml"));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }
}
