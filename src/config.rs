//! Construction-time engine configuration.
//!
//! The surrounding firmware passes an explicit configuration struct,
//! validated once at startup and never mutated afterwards; there are no
//! tunable embedded constants.

/// Default voice pool capacity. Eight square-wave voices is comfortably
/// within budget for a small microcontroller's sample generator.
pub const DEFAULT_POLYPHONY: usize = 8;

/// Fixed parameters the engine consumes at construction.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EngineConfig {
    /// Base amplitude scaling applied to every voice, `0.0..=1.0`.
    pub master_volume: f32,
    /// Pitch bend range in semitones at full wheel deflection, `0.0..=24.0`.
    pub pitch_bend_range: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            master_volume: 0.5,
            pitch_bend_range: 2.0,
        }
    }
}

impl EngineConfig {
    /// Checks every parameter against its documented range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.master_volume) {
            return Err(ConfigError::VolumeOutOfRange);
        }
        if !(0.0..=24.0).contains(&self.pitch_bend_range) {
            return Err(ConfigError::BendRangeOutOfRange);
        }
        Ok(())
    }
}

/// A construction-time parameter was outside its documented range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// `master_volume` must lie in `0.0..=1.0`.
    VolumeOutOfRange,
    /// `pitch_bend_range` must lie in `0.0..=24.0`.
    BendRangeOutOfRange,
    /// The voice pool needs at least one slot.
    ZeroPolyphony,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::VolumeOutOfRange => write!(f, "master volume outside 0.0..=1.0"),
            Self::BendRangeOutOfRange => write!(f, "pitch bend range outside 0.0..=24.0"),
            Self::ZeroPolyphony => write!(f, "voice pool capacity must be nonzero"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert_eq!(
            Ok(()),
            EngineConfig::default().validate(),
            "Expected left but got right"
        );
    }

    #[test]
    fn volume_above_unity_is_rejected() {
        let config = EngineConfig {
            master_volume: 1.5,
            ..EngineConfig::default()
        };
        assert_eq!(
            Err(ConfigError::VolumeOutOfRange),
            config.validate(),
            "Expected left but got right"
        );
    }

    #[test]
    fn nan_volume_is_rejected() {
        let config = EngineConfig {
            master_volume: f32::NAN,
            ..EngineConfig::default()
        };
        assert_eq!(
            Err(ConfigError::VolumeOutOfRange),
            config.validate(),
            "Expected left but got right"
        );
    }

    #[test]
    fn excessive_bend_range_is_rejected() {
        let config = EngineConfig {
            pitch_bend_range: 48.0,
            ..EngineConfig::default()
        };
        assert_eq!(
            Err(ConfigError::BendRangeOutOfRange),
            config.validate(),
            "Expected left but got right"
        );
    }
}
