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

//! Note events as seen by the engine, and their translation from MIDI.

use midly::live::LiveEvent;
use midly::num::u4;
use midly::MidiMessage;

pub mod sequence;

/// Controller number for "all sound off".
const CC_ALL_SOUND_OFF: u8 = 120;

/// Controller number for "all notes off".
const CC_ALL_NOTES_OFF: u8 = 123;

/// What a note event does.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoteEventKind {
    On,
    Off,
    /// Releases every note on the channel.
    AllOff,
}

/// A note event stamped with its sample offset inside a block.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoteEvent {
    kind: NoteEventKind,
    channel: u8,
    note: u8,
    velocity: f32,
    offset: usize,
}

impl NoteEvent {
    fn new(kind: NoteEventKind, channel: u8, note: u8, velocity: f32, offset: usize) -> Self {
        let velocity = if velocity.is_nan() {
            0.0
        } else {
            velocity.clamp(0.0, 1.0)
        };
        Self {
            kind,
            channel: channel.clamp(1, 16),
            note: note.min(127),
            velocity,
            offset,
        }
    }

    /// A note on. Channels are 1-16 and velocity is clamped to 0.0-1.0.
    pub fn note_on(channel: u8, note: u8, velocity: f32, offset: usize) -> Self {
        Self::new(NoteEventKind::On, channel, note, velocity, offset)
    }

    /// A note off.
    pub fn note_off(channel: u8, note: u8, offset: usize) -> Self {
        Self::new(NoteEventKind::Off, channel, note, 0.0, offset)
    }

    /// Releases every note on the channel.
    pub fn all_notes_off(channel: u8, offset: usize) -> Self {
        Self::new(NoteEventKind::AllOff, channel, 0, 0.0, offset)
    }

    /// Translates a raw MIDI message. Returns None for anything that isn't a note on,
    /// note off or an all-notes-off controller.
    pub fn from_midi(raw: &[u8], offset: usize) -> Option<Self> {
        match LiveEvent::parse(raw).ok()? {
            LiveEvent::Midi { channel, message } => Self::from_message(channel, message, offset),
            _ => None,
        }
    }

    /// Translates a parsed channel message.
    pub fn from_message(channel: u4, message: MidiMessage, offset: usize) -> Option<Self> {
        let channel = u8::from(channel) + 1;
        match message {
            // Velocity 0 is a note off by convention.
            MidiMessage::NoteOn { key, vel } if vel.as_int() == 0 => {
                Some(Self::note_off(channel, key.as_int(), offset))
            }
            MidiMessage::NoteOn { key, vel } => Some(Self::note_on(
                channel,
                key.as_int(),
                vel.as_int() as f32 / 127.0,
                offset,
            )),
            MidiMessage::NoteOff { key, .. } => Some(Self::note_off(channel, key.as_int(), offset)),
            MidiMessage::Controller { controller, .. }
                if matches!(controller.as_int(), CC_ALL_SOUND_OFF | CC_ALL_NOTES_OFF) =>
            {
                Some(Self::all_notes_off(channel, offset))
            }
            _ => None,
        }
    }

    /// Returns a copy of the event at a different offset.
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn kind(&self) -> NoteEventKind {
        self.kind
    }

    /// Gets the channel (1-indexed).
    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn note(&self) -> u8 {
        self.note
    }

    pub fn velocity(&self) -> f32 {
        self.velocity
    }

    /// Gets the sample offset within the block.
    pub fn offset(&self) -> usize {
        self.offset
    }
}
