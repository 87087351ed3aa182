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

//! The voice engine: the real-time half of the sampler.
//!
//! [`VoiceEngine::render_block`] is called once per audio callback. It never allocates,
//! blocks or logs. Everything it needs is allocated in [`VoiceEngine::new`], and
//! anything it lets go of is handed to the control thread through the retirement queue.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::bank::BankSnapshot;
use super::handoff::{BankHandoff, EngineStats, Retirement};
use super::voice::Voice;
use crate::config::{OutputMode, SamplerConfig, VoiceStealing};
use crate::midi::{NoteEvent, NoteEventKind};

/// Number of MIDI channels tracked for held notes.
const MIDI_CHANNELS: usize = 16;

/// Bitset of the (channel, note) pairs currently held down.
#[derive(Default)]
struct HeldNotes {
    channels: [u128; MIDI_CHANNELS],
}

impl HeldNotes {
    fn press(&mut self, channel: u8, note: u8) {
        self.channels[channel_index(channel)] |= 1u128 << (note & 0x7f);
    }

    fn lift(&mut self, channel: u8, note: u8) {
        self.channels[channel_index(channel)] &= !(1u128 << (note & 0x7f));
    }

    fn lift_channel(&mut self, channel: u8) {
        self.channels[channel_index(channel)] = 0;
    }

    fn any(&self) -> bool {
        self.channels.iter().any(|&notes| notes != 0)
    }

    fn clear(&mut self) {
        self.channels = [0; MIDI_CHANNELS];
    }
}

/// Maps a 1-indexed MIDI channel onto the held-notes table.
fn channel_index(channel: u8) -> usize {
    (channel.clamp(1, MIDI_CHANNELS as u8) - 1) as usize
}

/// Stable in-place sort by block offset. Insertion sort keeps equal offsets in arrival
/// order without needing a scratch buffer.
fn sort_by_offset(events: &mut [NoteEvent]) {
    for i in 1..events.len() {
        let mut j = i;
        while j > 0 && events[j - 1].offset() > events[j].offset() {
            events.swap(j - 1, j);
            j -= 1;
        }
    }
}

/// The real-time voice engine. Owned by the audio thread.
pub struct VoiceEngine {
    voices: Vec<Voice>,
    voice_stealing: VoiceStealing,
    output_mode: OutputMode,
    sample_rate: u32,
    bank: Arc<BankSnapshot>,
    handoff: Arc<BankHandoff>,
    retirement: Retirement,
    /// Scratch list for the current block's events, allocated once.
    pending: Vec<NoteEvent>,
    max_events: usize,
    held: HeldNotes,
    held_samples: u64,
    next_serial: u64,
    stats: Arc<EngineStats>,
}

impl VoiceEngine {
    /// Creates an engine with a fixed pool of voices. The config is assumed to be
    /// validated.
    pub(crate) fn new(
        config: &SamplerConfig,
        sample_rate: u32,
        handoff: Arc<BankHandoff>,
        retirement: Retirement,
        stats: Arc<EngineStats>,
    ) -> Self {
        Self {
            voices: (0..config.polyphony()).map(|_| Voice::new()).collect(),
            voice_stealing: config.voice_stealing(),
            output_mode: config.output_mode(),
            sample_rate,
            bank: Arc::new(BankSnapshot::default()),
            handoff,
            retirement,
            pending: Vec::with_capacity(config.max_events_per_block()),
            max_events: config.max_events_per_block(),
            held: HeldNotes::default(),
            held_samples: 0,
            next_serial: 0,
            stats,
        }
    }

    /// Renders one block into an interleaved buffer of `channels` channels.
    ///
    /// Events are applied at their sample offset within the block; offsets past the
    /// end of the block are applied after the last frame. Depending on the output mode
    /// the buffer is cleared first or mixed into.
    pub fn render_block(&mut self, output: &mut [f32], channels: usize, events: &[NoteEvent]) {
        if self.output_mode == OutputMode::Replace {
            output.fill(0.0);
        }
        let frames = if channels == 0 {
            0
        } else {
            output.len() / channels
        };

        self.sync_bank();

        self.pending.clear();
        self.pending.extend(events.iter().take(self.max_events).copied());
        if events.len() > self.max_events {
            self.stats
                .dropped_events
                .fetch_add((events.len() - self.max_events) as u64, Ordering::Relaxed);
        }
        sort_by_offset(&mut self.pending);

        let mut cursor = 0;
        for index in 0..self.pending.len() {
            let event = self.pending[index];
            let at = event.offset().min(frames);
            if at > cursor {
                self.render_span(output, channels, cursor, at);
                cursor = at;
            }
            self.handle_event(&event);
        }
        if frames > cursor {
            self.render_span(output, channels, cursor, frames);
        }

        self.held_samples = if self.held.any() {
            self.held_samples + frames as u64
        } else {
            0
        };
        self.stats
            .held_samples
            .store(self.held_samples, Ordering::Relaxed);
        self.stats
            .active_voices
            .store(self.active_voices(), Ordering::Relaxed);
    }

    /// Silences every voice, forgets held notes and adopts a new output sample rate.
    /// Must not be called concurrently with rendering; hosts call it before playback.
    pub fn prepare(&mut self, sample_rate: u32) {
        for voice in self.voices.iter_mut() {
            voice.stop(&self.retirement);
        }
        self.held.clear();
        self.held_samples = 0;
        if sample_rate > 0 {
            self.sample_rate = sample_rate;
        }
        self.stats.held_samples.store(0, Ordering::Relaxed);
        self.stats.active_voices.store(0, Ordering::Relaxed);
    }

    /// Returns the number of voices currently producing audio.
    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.is_sounding()).count()
    }

    /// Gets the size of the voice pool.
    pub fn polyphony(&self) -> usize {
        self.voices.len()
    }

    /// Number of samples any note has been continuously held for. Diagnostic only; it
    /// has no effect on the audio.
    pub fn held_samples(&self) -> u64 {
        self.held_samples
    }

    /// Gets the output sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Gets the generation of the bank snapshot in use.
    pub fn bank_generation(&self) -> u64 {
        self.bank.generation()
    }

    /// Picks up a newly published bank, if the mailbox can be taken without waiting.
    /// Voices whose sound isn't in the new bank are released.
    fn sync_bank(&mut self) {
        let Some(next) = self.handoff.try_take() else {
            return;
        };
        let previous = std::mem::replace(&mut self.bank, next);

        let bank = &self.bank;
        for voice in self.voices.iter_mut() {
            let orphaned = voice.sound().is_some_and(|sound| !bank.contains(sound));
            if orphaned {
                voice.release(self.sample_rate);
            }
        }

        self.stats
            .bank_generation
            .store(self.bank.generation(), Ordering::Relaxed);
        self.retirement.snapshot(previous);
    }

    fn handle_event(&mut self, event: &NoteEvent) {
        match event.kind() {
            NoteEventKind::On => self.note_on(event),
            NoteEventKind::Off => self.note_off(event.channel(), event.note()),
            NoteEventKind::AllOff => self.all_notes_off(event.channel()),
        }
    }

    fn note_on(&mut self, event: &NoteEvent) {
        let (channel, note) = (event.channel(), event.note());
        self.held.press(channel, note);

        let Some(sound) = self.bank.find_sound(note).cloned() else {
            self.stats.unmapped_notes.fetch_add(1, Ordering::Relaxed);
            return;
        };

        // Retrigger: a second note-on for a sounding note releases the first.
        for voice in self.voices.iter_mut() {
            if voice.matches(channel, note) {
                voice.release(self.sample_rate);
            }
        }

        let Some(index) = self.acquire_voice() else {
            self.stats.dropped_notes.fetch_add(1, Ordering::Relaxed);
            return;
        };

        self.next_serial += 1;
        self.voices[index].start(
            sound,
            note,
            channel,
            event.velocity(),
            self.sample_rate,
            self.next_serial,
            &self.retirement,
        );
    }

    fn note_off(&mut self, channel: u8, note: u8) {
        self.held.lift(channel, note);
        for voice in self.voices.iter_mut() {
            if voice.matches(channel, note) {
                voice.release(self.sample_rate);
            }
        }
    }

    fn all_notes_off(&mut self, channel: u8) {
        self.held.lift_channel(channel);
        for voice in self.voices.iter_mut() {
            if voice.is_active() && voice.channel() == channel {
                voice.release(self.sample_rate);
            }
        }
    }

    /// Finds a voice for a new note: an idle one if possible, otherwise the oldest
    /// active voice when stealing is enabled.
    fn acquire_voice(&mut self) -> Option<usize> {
        if let Some(index) = self.voices.iter().position(|v| !v.is_active()) {
            return Some(index);
        }

        match self.voice_stealing {
            VoiceStealing::Oldest => {
                let index = self
                    .voices
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, v)| v.serial())
                    .map(|(index, _)| index)?;
                self.stats.stolen_voices.fetch_add(1, Ordering::Relaxed);
                Some(index)
            }
            VoiceStealing::Disabled => None,
        }
    }

    fn render_span(&mut self, output: &mut [f32], channels: usize, start: usize, end: usize) {
        for voice in self.voices.iter_mut() {
            if voice.is_sounding() {
                voice.render(output, channels, start, end, &self.retirement);
            }
        }
    }
}

impl std::fmt::Debug for VoiceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceEngine")
            .field("polyphony", &self.voices.len())
            .field("active_voices", &self.active_voices())
            .field("sample_rate", &self.sample_rate)
            .field("bank_generation", &self.bank.generation())
            .field("held_samples", &self.held_samples)
            .finish()
    }
}
