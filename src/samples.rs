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

//! The polyphonic sampler.
//!
//! This module provides:
//! - The sample bank mapping decoded sounds onto note ranges
//! - A fixed pool of voices with pitch-shifted, enveloped playback
//! - The real-time [`VoiceEngine`] and the non-real-time [`SamplerControl`] that feeds it
//! - Sample decoding into memory
//!
//! [`new_sampler`] creates the two halves. The control half mutates the bank and
//! publishes immutable snapshots; the engine picks them up at the start of a block
//! without ever blocking.

mod bank;
mod control;
mod engine;
mod handoff;
mod loader;
mod voice;

pub use bank::{BankSnapshot, DecodedSample, Envelope, SampleBank, SampleSound, MAX_NOTE};
pub use control::{new_sampler, SamplerControl, SamplerError};
pub use engine::VoiceEngine;
pub use handoff::EngineMonitor;
pub use loader::{decode_file, LoadError};
