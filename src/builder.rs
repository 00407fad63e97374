//! Configuration and builder for a [`SynthEngine`].

use cantus_voice::VoiceParameterSet;

use crate::{Error, Result, SynthEngine};

/// Engine-wide settings fixed at build time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    pub sample_rate: f32,
    /// Block length that envelopes and LFOs step at.
    pub buffer_size: usize,
    /// Root of every note's random choices.
    pub seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100.0,
            buffer_size: 256,
            seed: 0,
        }
    }
}

impl EngineConfig {
    pub const MIN_SAMPLE_RATE: f32 = 8000.0;
    pub const MAX_SAMPLE_RATE: f32 = 384_000.0;
    pub const MIN_BUFFER_SIZE: usize = 16;
    pub const MAX_BUFFER_SIZE: usize = 8192;

    pub fn validate(&self) -> Result<()> {
        if !(Self::MIN_SAMPLE_RATE..=Self::MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            return Err(Error::InvalidConfig(format!(
                "sample rate {} Hz outside {}..={} Hz",
                self.sample_rate,
                Self::MIN_SAMPLE_RATE,
                Self::MAX_SAMPLE_RATE
            )));
        }
        if !(Self::MIN_BUFFER_SIZE..=Self::MAX_BUFFER_SIZE).contains(&self.buffer_size) {
            return Err(Error::InvalidConfig(format!(
                "buffer size {} outside {}..={}",
                self.buffer_size,
                Self::MIN_BUFFER_SIZE,
                Self::MAX_BUFFER_SIZE
            )));
        }
        Ok(())
    }
}

/// Fluent builder for [`SynthEngine`].
///
/// # Example
///
/// ```ignore
/// use cantus::prelude::*;
///
/// let engine = SynthEngine::builder()
///     .sample_rate(48000.0)
///     .buffer_size(256)
///     .seed(7)
///     .parameters(VoiceParameterSet::single_voice(OscillatorTable::sine(1024)?))
///     .build()?;
/// ```
#[derive(Debug, Default)]
pub struct SynthEngineBuilder {
    config: EngineConfig,
    parameters: Option<VoiceParameterSet>,
}

impl SynthEngineBuilder {
    /// Default: 44100
    pub fn sample_rate(mut self, sample_rate: f32) -> Self {
        self.config.sample_rate = sample_rate;
        self
    }

    /// Default: 256
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.config.buffer_size = buffer_size;
        self
    }

    /// Default: 0
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Initial parameter set. Without one, every voice starts disabled.
    pub fn parameters(mut self, parameters: VoiceParameterSet) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<SynthEngine> {
        self.config.validate()?;
        let engine = SynthEngine::from_parts(self.config, self.parameters.unwrap_or_default());
        tracing::info!(
            sample_rate = self.config.sample_rate,
            buffer_size = self.config.buffer_size,
            "Synth engine built"
        );
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range() {
        let low = EngineConfig {
            sample_rate: 4000.0,
            ..Default::default()
        };
        assert!(matches!(low.validate(), Err(Error::InvalidConfig(_))));

        let nan = EngineConfig {
            sample_rate: f32::NAN,
            ..Default::default()
        };
        assert!(nan.validate().is_err());

        let tiny = EngineConfig {
            buffer_size: 8,
            ..Default::default()
        };
        assert!(tiny.validate().is_err());
    }

    #[test]
    fn test_builder_applies_settings() {
        let engine = SynthEngineBuilder::default()
            .sample_rate(96000.0)
            .buffer_size(128)
            .seed(3)
            .build()
            .unwrap();
        assert_eq!(engine.config().sample_rate, 96000.0);
        assert_eq!(engine.config().buffer_size, 128);
        assert_eq!(engine.config().seed, 3);
    }

    #[test]
    fn test_builder_rejects_bad_config() {
        assert!(SynthEngineBuilder::default().buffer_size(0).build().is_err());
    }
}
