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

//! The control side of the sampler.

use std::path::Path;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use tracing::{debug, info};

use super::bank::{DecodedSample, Envelope, SampleBank, SampleSound};
use super::engine::VoiceEngine;
use super::handoff::{BankHandoff, EngineMonitor, EngineStats, Retired, Retirement};
use super::loader::{decode_file, LoadError};
use crate::config::{ConfigError, SamplerConfig};

/// Errors from loading sounds into the bank.
#[derive(Debug, thiserror::Error)]
pub enum SamplerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Creates a connected control handle and engine. The engine goes to the audio thread,
/// the control handle stays with whoever manages sounds.
pub fn new_sampler(
    config: &SamplerConfig,
    sample_rate: u32,
) -> Result<(SamplerControl, VoiceEngine), ConfigError> {
    config.validate()?;
    if sample_rate == 0 {
        return Err(ConfigError::InvalidSampleRate);
    }

    let stats = Arc::new(EngineStats::default());
    let handoff = Arc::new(BankHandoff::default());
    // Every voice can retire its sound and a stolen tail in one block, plus snapshots.
    let (retirement, retired) = Retirement::channel(config.polyphony() * 4 + 16, stats.clone());

    let engine = VoiceEngine::new(config, sample_rate, handoff.clone(), retirement, stats.clone());
    let control = SamplerControl {
        bank: SampleBank::new(config.max_sample_seconds()),
        envelope: config.envelope(),
        handoff,
        retired,
        monitor: EngineMonitor::new(stats),
        generation: 0,
    };

    info!(
        polyphony = config.polyphony(),
        sample_rate,
        voice_stealing = ?config.voice_stealing(),
        output_mode = ?config.output_mode(),
        "Sampler created"
    );
    Ok((control, engine))
}

/// Owns the sample bank and publishes it to the engine. Not real-time safe.
///
/// The engine hands back every sound a finished voice lets go of, so the host must call
/// [`SamplerControl::collect_garbage`] regularly while rendering (once per block or on a
/// timer). If it doesn't, the retirement queue fills and the engine starts freeing on
/// the audio thread, counted in [`EngineMonitor::retire_overflows`].
pub struct SamplerControl {
    bank: SampleBank,
    envelope: Envelope,
    handoff: Arc<BankHandoff>,
    retired: Receiver<Retired>,
    monitor: EngineMonitor,
    generation: u64,
}

impl SamplerControl {
    /// Gets the bank as last modified on the control side.
    pub fn bank(&self) -> &SampleBank {
        &self.bank
    }

    /// Gets the envelope used when none is given.
    pub fn default_envelope(&self) -> Envelope {
        self.envelope
    }

    /// Gets a monitor for the engine's counters.
    pub fn monitor(&self) -> &EngineMonitor {
        &self.monitor
    }

    /// Gets the generation of the last published snapshot.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Removes every sound and publishes the empty bank. Playing voices fade out.
    pub fn clear(&mut self) {
        self.bank.clear();
        self.publish();
    }

    /// Registers a decoded sound and publishes the bank.
    pub fn add_sound(
        &mut self,
        name: &str,
        sample: DecodedSample,
        low_note: u8,
        high_note: u8,
        root_note: u8,
        envelope: Envelope,
    ) -> Result<Arc<SampleSound>, ConfigError> {
        let sound = self
            .bank
            .add_sound(name, sample, low_note, high_note, root_note, envelope)?;
        self.publish();
        Ok(sound)
    }

    /// Decodes a file and registers it, using the default envelope unless one is given.
    pub fn load_sound(
        &mut self,
        name: &str,
        path: &Path,
        low_note: u8,
        high_note: u8,
        root_note: u8,
        envelope: Option<Envelope>,
    ) -> Result<Arc<SampleSound>, SamplerError> {
        let sample = decode_file(path)?;
        let envelope = envelope.unwrap_or(self.envelope);
        Ok(self.add_sound(name, sample, low_note, high_note, root_note, envelope)?)
    }

    /// Replaces the bank with the sounds listed in the config. Files are resolved
    /// against `base_path`. Everything is decoded before the bank is touched, so a
    /// failure leaves the current sounds in place.
    pub fn load_config_sounds(
        &mut self,
        config: &SamplerConfig,
        base_path: &Path,
    ) -> Result<usize, SamplerError> {
        let defaults = config.envelope();
        let mut bank = SampleBank::new(config.max_sample_seconds());
        for definition in config.sounds() {
            let path = definition.resolve_file(base_path);
            let sample = decode_file(&path)?;
            let (low, high) = definition.range();
            bank.add_sound(
                definition.name(),
                sample,
                low,
                high,
                definition.root(),
                definition.envelope(defaults),
            )?;
        }

        let loaded = bank.len();
        info!(
            sounds = loaded,
            memory_kb = bank.memory_usage() / 1024,
            "Loaded sounds from config"
        );
        self.bank = bank;
        self.publish();
        Ok(loaded)
    }

    /// Publishes the current bank as a new snapshot.
    pub fn publish(&mut self) {
        self.generation += 1;
        let snapshot = Arc::new(self.bank.snapshot(self.generation));
        if let Some(unused) = self.handoff.publish(snapshot) {
            debug!(
                generation = unused.generation(),
                "Replaced snapshot the engine never picked up"
            );
        }
        debug!(
            generation = self.generation,
            sounds = self.bank.len(),
            "Published sample bank"
        );
        self.collect_garbage();
    }

    /// Frees everything the engine has let go of. Returns the number of items freed.
    pub fn collect_garbage(&mut self) -> usize {
        let (mut snapshots, mut sounds) = (0usize, 0usize);
        for retired in self.retired.try_iter() {
            match retired {
                Retired::Snapshot(snapshot) => {
                    snapshots += 1;
                    drop(snapshot);
                }
                Retired::Sound(sound) => {
                    sounds += 1;
                    drop(sound);
                }
            }
        }
        if snapshots + sounds > 0 {
            debug!(snapshots, sounds, "Collected retired items");
        }
        snapshots + sounds
    }
}

impl std::fmt::Debug for SamplerControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamplerControl")
            .field("bank", &self.bank)
            .field("generation", &self.generation)
            .finish()
    }
}
