//! Wavelength-dependent scattering coefficients.

use glam::Vec3;

/// Wavelength (nm) at which a channel scatters with exactly `strength`.
pub const REFERENCE_WAVELENGTH: f32 = 400.0;

/// Per-channel (R, G, B) scattering coefficients.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScatterCoefficients(pub Vec3);

impl ScatterCoefficients {
    /// `(REFERENCE_WAVELENGTH / wavelength)^4 * strength` per channel.
    ///
    /// Inputs are expected to be clamped by the configuration layer; a
    /// negative strength is still floored to zero so no channel goes negative.
    pub fn from_wavelengths(wavelengths: [f32; 3], strength: f32) -> Self {
        let strength = strength.max(0.0);
        let channel = |wavelength: f32| (REFERENCE_WAVELENGTH / wavelength).powi(4) * strength;
        Self(Vec3::new(
            channel(wavelengths[0]),
            channel(wavelengths[1]),
            channel(wavelengths[2]),
        ))
    }

    pub fn as_vec3(self) -> Vec3 {
        self.0
    }
}

/// Caches coefficients for the last wavelength/strength inputs.
#[derive(Clone, Debug)]
pub struct ScatterCoefficientModel {
    wavelengths: [f32; 3],
    strength: f32,
    coefficients: ScatterCoefficients,
}

impl ScatterCoefficientModel {
    pub fn new(wavelengths: [f32; 3], strength: f32) -> Self {
        Self {
            wavelengths,
            strength,
            coefficients: ScatterCoefficients::from_wavelengths(wavelengths, strength),
        }
    }

    /// Recompute if the inputs changed. Returns whether a recompute happened.
    pub fn update(&mut self, wavelengths: [f32; 3], strength: f32) -> bool {
        if wavelengths == self.wavelengths && strength == self.strength {
            return false;
        }
        self.wavelengths = wavelengths;
        self.strength = strength;
        self.coefficients = ScatterCoefficients::from_wavelengths(wavelengths, strength);
        tracing::debug!(
            "Scatter coefficients recomputed: {:?} (wavelengths {wavelengths:?}, strength {strength})",
            self.coefficients.0
        );
        true
    }

    pub fn current(&self) -> ScatterCoefficients {
        self.coefficients
    }

    pub fn wavelengths(&self) -> [f32; 3] {
        self.wavelengths
    }

    pub fn strength(&self) -> f32 {
        self.strength
    }
}

impl From<&halo_config::ScatteringConfig> for ScatterCoefficientModel {
    fn from(config: &halo_config::ScatteringConfig) -> Self {
        Self::new(config.wavelengths, config.strength)
    }
}
