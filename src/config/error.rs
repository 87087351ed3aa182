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

/// Typed error for setup-time failures: config load/parse problems and invalid
/// sampler or sound parameters. None of these can occur while rendering.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config load/parse error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Polyphony must be greater than zero")]
    InvalidPolyphony,

    #[error("max_events_per_block must be greater than zero")]
    InvalidMaxEvents,

    #[error("Invalid note range {low}..={high}: notes must be within 0..=127 and low <= high")]
    InvalidRange { low: u8, high: u8 },

    #[error("Root note {0} is outside 0..=127")]
    InvalidRootNote(u8),

    #[error("Sample rate must be greater than zero")]
    InvalidSampleRate,

    #[error("{name} must be a finite, non-negative number (got {value})")]
    InvalidParameter { name: &'static str, value: f64 },

    #[error("Sample buffer is empty")]
    EmptySample,
}

/// Checks that a gain or time parameter is finite and non-negative.
pub(crate) fn check_parameter(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidParameter { name, value })
    }
}
