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
use std::error::Error;
use std::path::{Path, PathBuf};

use clap::{crate_version, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lowfat::config::{SamplerConfig, SoundDefinition};
use lowfat::midi::sequence::Sequence;
use lowfat::render::{render_sequence, write_wav, RenderOptions};
use lowfat::samples::new_sampler;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A polyphonic, sample-based instrument."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Renders a MIDI file through the sampler into a WAV file.
    Render {
        /// The MIDI file to play.
        midi_path: String,
        /// Where to write the rendered WAV file.
        output_path: String,
        /// The sampler config. Its sounds are loaded unless --sample is given.
        #[arg[short, long]]
        config: Option<String>,
        /// A single audio file to map instead of the configured sounds.
        #[arg[short, long]]
        sample: Option<String>,
        /// The root note of --sample.
        #[arg[long, default_value_t = 52]]
        root: u8,
        /// The lowest note --sample answers to. Defaults to the root note.
        #[arg[long]]
        low: Option<u8>,
        /// The highest note --sample answers to. Defaults to the root note.
        #[arg[long]]
        high: Option<u8>,
        /// The output sample rate.
        #[arg[long, default_value_t = 44100]]
        sample_rate: u32,
        /// Frames rendered per block.
        #[arg[long, default_value_t = 512]]
        block_size: usize,
        /// Output channels.
        #[arg[long, default_value_t = 2]]
        channels: usize,
        /// Seconds rendered after the last event.
        #[arg[short, long, default_value_t = 1.0]]
        tail: f64,
    },
    /// Lists the sounds in a sampler config and the notes they answer to.
    Sounds {
        /// The path to the sampler config.
        config_path: String,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Render {
            midi_path,
            output_path,
            config,
            sample,
            root,
            low,
            high,
            sample_rate,
            block_size,
            channels,
            tail,
        } => {
            let (mut config, mut base_path) = match &config {
                Some(path) => {
                    let path = PathBuf::from(path);
                    let base_path = path.parent().map(Path::to_path_buf).unwrap_or_default();
                    (SamplerConfig::load(&path)?, base_path)
                }
                None => (SamplerConfig::default(), PathBuf::new()),
            };
            // A sample on the command line replaces the configured sounds.
            if let Some(sample) = sample {
                config = config.with_sounds(vec![SoundDefinition::new(sample, root, low, high)]);
                base_path = PathBuf::new();
            }

            let (mut control, mut engine) = new_sampler(&config, sample_rate)?;
            control.load_config_sounds(&config, &base_path)?;
            if control.bank().is_empty() {
                warn!("No sounds loaded, the output will be silent");
            }

            let sequence = Sequence::from_file(Path::new(&midi_path), sample_rate)?;
            let options = RenderOptions {
                block_size,
                channels,
                tail_frames: (tail.max(0.0) * sample_rate as f64) as u64,
            };
            let output = render_sequence(&mut engine, &mut control, &sequence, &options)?;
            write_wav(Path::new(&output_path), &output, channels, sample_rate)?;

            let monitor = control.monitor();
            info!(
                unmapped_notes = monitor.unmapped_notes(),
                dropped_notes = monitor.dropped_notes(),
                stolen_voices = monitor.stolen_voices(),
                dropped_events = monitor.dropped_events(),
                retire_overflows = monitor.retire_overflows(),
                "Render finished"
            );
        }
        Commands::Sounds { config_path } => {
            let config = SamplerConfig::load(Path::new(&config_path))?;
            let sounds = config.sounds();
            if sounds.is_empty() {
                println!("No sounds configured in {}.", config_path);
                return Ok(());
            }

            println!(
                "Sounds (count: {}, polyphony: {}):",
                sounds.len(),
                config.polyphony()
            );
            for sound in sounds {
                let (low, high) = sound.range();
                println!(
                    "- {} ({}): notes {}-{}, root {}",
                    sound.name(),
                    sound.file(),
                    low,
                    high,
                    sound.root()
                );
            }
        }
    }

    Ok(())
}
