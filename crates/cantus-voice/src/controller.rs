//! Per-block controller scalars read by every note.

/// Glide state published by the portamento collaborator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortamentoState {
    /// Current frequency ratio relative to the target note.
    pub freq_ratio: f32,
    /// False once the glide has finished.
    pub used: bool,
}

impl Default for PortamentoState {
    fn default() -> Self {
        Self {
            freq_ratio: 1.0,
            used: false,
        }
    }
}

/// Read-only per-block controller values. Defaults are neutral.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Controller {
    /// Pitch bend as a frequency ratio.
    pub pitch_wheel: f32,
    /// Scales frequency LFO depth.
    pub mod_wheel: f32,
    /// Scales fine detune and unison spread.
    pub bandwidth: f32,
    pub portamento: PortamentoState,
    /// Scales modulator depth.
    pub fm_amp: f32,
    /// Cutoff offset in octaves.
    pub filter_cutoff: f32,
    /// Resonance ratio.
    pub filter_q: f32,
}

impl Default for Controller {
    fn default() -> Self {
        Self {
            pitch_wheel: 1.0,
            mod_wheel: 1.0,
            bandwidth: 1.0,
            portamento: PortamentoState::default(),
            fm_amp: 1.0,
            filter_cutoff: 0.0,
            filter_q: 1.0,
        }
    }
}

impl Controller {
    /// Set pitch bend in cents.
    pub fn set_pitch_bend_cents(&mut self, cents: f32) {
        self.pitch_wheel = (cents / 1200.0).exp2();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pitch_bend() {
        let mut ctl = Controller::default();
        ctl.set_pitch_bend_cents(1200.0);
        assert_relative_eq!(ctl.pitch_wheel, 2.0);
        ctl.set_pitch_bend_cents(-200.0);
        assert_relative_eq!(ctl.pitch_wheel, 0.890_899_5, epsilon = 1e-6);
    }
}
