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

//! Standard MIDI files converted to frame-stamped note events.

use std::fs;
use std::path::Path;
use std::time::Duration;

use midly::{Format, Smf, Timing};
use nodi::timers::Ticker;
use nodi::{Event, Sheet, Timer};
use tracing::{debug, info};

use super::NoteEvent;

/// Tempo assumed until the file sets one: 120 BPM.
const DEFAULT_TEMPO_MICROS: u32 = 500_000;

#[derive(Debug, thiserror::Error)]
pub enum SequenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("MIDI parse error: {0}")]
    Midi(#[from] midly::Error),

    #[error("MIDI file has no timing resolution")]
    InvalidTiming,
}

/// A note event at an absolute frame.
#[derive(Clone, Copy, Debug, PartialEq)]
struct TimedEvent {
    frame: u64,
    event: NoteEvent,
}

/// Note events laid out on a sample timeline.
#[derive(Clone, Debug, Default)]
pub struct Sequence {
    events: Vec<TimedEvent>,
    length_frames: u64,
}

impl Sequence {
    /// Reads a MIDI file and converts it for the given output sample rate.
    pub fn from_file(path: &Path, sample_rate: u32) -> Result<Sequence, SequenceError> {
        info!(path = ?path, "Reading MIDI file");
        let buf = fs::read(path)?;
        let smf = Smf::parse(&buf)?;
        Self::from_smf(&smf, sample_rate)
    }

    /// Converts a parsed MIDI file. Tempo changes are honored for metrical timing.
    pub fn from_smf(smf: &Smf, sample_rate: u32) -> Result<Sequence, SequenceError> {
        let sheet = match smf.header.format {
            Format::SingleTrack | Format::Sequential => Sheet::sequential(&smf.tracks),
            Format::Parallel => Sheet::parallel(&smf.tracks),
        };
        let end_tick = end_tick(smf);

        match smf.header.timing {
            Timing::Metrical(ticks_per_beat) if ticks_per_beat.as_int() > 0 => {
                let mut ticker = Ticker::try_from(smf.header.timing)
                    .map_err(|_| SequenceError::InvalidTiming)?;
                ticker.change_tempo(DEFAULT_TEMPO_MICROS);
                Ok(Self::from_sheet(&sheet, end_tick, ticker, sample_rate))
            }
            // Ticker only understands metrical timing.
            Timing::Timecode(fps, subframes) if fps.as_f32() > 0.0 && subframes > 0 => {
                let timer = TimecodeTimer::new(fps.as_f32(), subframes);
                Ok(Self::from_sheet(&sheet, end_tick, timer, sample_rate))
            }
            _ => Err(SequenceError::InvalidTiming),
        }
    }

    /// Walks the sheet one moment per tick, timing each moment with the timer.
    fn from_sheet<T: Timer>(
        sheet: &Sheet,
        end_tick: u64,
        mut timer: T,
        sample_rate: u32,
    ) -> Sequence {
        let mut elapsed = Duration::ZERO;
        let mut last_tick = 0u64;
        let mut events = Vec::new();
        for (tick, moment) in sheet.iter().enumerate() {
            if moment.events.is_empty() {
                continue;
            }
            let tick = tick as u64;
            elapsed += tick_duration(&mut timer, tick - last_tick);
            last_tick = tick;

            let frame = to_frame(elapsed, sample_rate);
            for event in moment.events.iter() {
                match event {
                    Event::Tempo(tempo) => timer.change_tempo(*tempo),
                    Event::Midi(midi) => {
                        if let Some(event) = NoteEvent::from_message(midi.channel, midi.message, 0)
                        {
                            events.push(TimedEvent { frame, event });
                        }
                    }
                    _ => {}
                }
            }
        }
        elapsed += tick_duration(&mut timer, end_tick.saturating_sub(last_tick));

        let length_frames = to_frame(elapsed, sample_rate);
        debug!(
            events = events.len(),
            length_frames,
            sample_rate,
            "Converted MIDI file"
        );
        Sequence {
            events,
            length_frames,
        }
    }

    /// Builds a sequence from events at absolute frames. The events' own offsets are
    /// ignored.
    pub fn from_events(events: impl IntoIterator<Item = (u64, NoteEvent)>) -> Sequence {
        let mut events: Vec<TimedEvent> = events
            .into_iter()
            .map(|(frame, event)| TimedEvent { frame, event })
            .collect();
        events.sort_by_key(|e| e.frame);
        let length_frames = events.last().map(|e| e.frame).unwrap_or(0);
        Sequence {
            events,
            length_frames,
        }
    }

    /// Gets the number of note events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if there are no note events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Frame of the last event in the file, including end-of-track markers.
    pub fn length_frames(&self) -> u64 {
        self.length_frames
    }

    /// Starts walking the sequence block by block.
    pub fn scheduler(&self) -> BlockScheduler<'_> {
        BlockScheduler {
            sequence: self,
            index: 0,
            position: 0,
        }
    }
}

/// Hands out a sequence's events one block at a time, with block-relative offsets.
#[derive(Debug)]
pub struct BlockScheduler<'a> {
    sequence: &'a Sequence,
    index: usize,
    position: u64,
}

impl BlockScheduler<'_> {
    /// Fills `events` with everything falling inside the next `frames` frames.
    pub fn next_block(&mut self, frames: usize, events: &mut Vec<NoteEvent>) {
        events.clear();
        let end = self.position + frames as u64;
        while let Some(timed) = self.sequence.events.get(self.index) {
            if timed.frame >= end {
                break;
            }
            let offset = timed.frame.saturating_sub(self.position) as usize;
            events.push(timed.event.with_offset(offset));
            self.index += 1;
        }
        self.position = end;
    }

    /// Frame at which the next block starts.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Returns true once every event has been handed out.
    pub fn is_finished(&self) -> bool {
        self.index >= self.sequence.events.len()
    }
}

/// The tick at which the last track ends.
fn end_tick(smf: &Smf) -> u64 {
    let lengths = smf.tracks.iter().map(|track| {
        track
            .iter()
            .map(|event| event.delta.as_int() as u64)
            .sum::<u64>()
    });
    match smf.header.format {
        Format::Parallel => lengths.max().unwrap_or(0),
        Format::SingleTrack | Format::Sequential => lengths.sum(),
    }
}

fn tick_duration<T: Timer>(timer: &mut T, ticks: u64) -> Duration {
    timer.sleep_duration(u32::try_from(ticks).unwrap_or(u32::MAX))
}

fn to_frame(elapsed: Duration, sample_rate: u32) -> u64 {
    (elapsed.as_secs_f64() * sample_rate as f64).round() as u64
}

/// Fixed-length ticks for SMPTE timecode files, which carry no tempo.
struct TimecodeTimer {
    micros_per_tick: f64,
}

impl TimecodeTimer {
    fn new(fps: f32, subframes: u8) -> TimecodeTimer {
        TimecodeTimer {
            micros_per_tick: 1_000_000.0 / (fps as f64 * subframes as f64),
        }
    }
}

impl Timer for TimecodeTimer {
    fn sleep_duration(&mut self, n_ticks: u32) -> Duration {
        Duration::from_secs_f64(self.micros_per_tick * n_ticks as f64 / 1_000_000.0)
    }

    fn change_tempo(&mut self, _tempo: u32) {}

    fn sleep(&mut self, n_ticks: u32) {
        std::thread::sleep(self.sleep_duration(n_ticks));
    }
}
