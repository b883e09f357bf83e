//! Detector energy-resolution model.
//!
//! The simulation produces exact deposited energies. Real HPGe crystals
//! broaden every line, so each closed event's per-crystal energy is smeared
//! with a Gaussian whose width grows linearly with energy:
//!
//! `sigma(E) = a + E * b / (E_high - E_low)`
//!
//! where `E_low`/`E_high` are the calibration lines the coefficients were
//! fitted against (59.5 keV from 241Am, 1332.5 keV from 60Co).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Linear sigma curve `(a, b)` over a fixed reference span.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigmaModel {
    /// Constant term in keV.
    pub a: f64,
    /// Sigma growth across the reference span in keV.
    pub b: f64,
    /// Lower calibration energy in keV.
    pub reference_low_kev: f64,
    /// Upper calibration energy in keV.
    pub reference_high_kev: f64,
}

impl Default for SigmaModel {
    fn default() -> Self {
        // ~1.9 keV FWHM at 1332.5 keV
        Self {
            a: 0.35,
            b: 0.45,
            reference_low_kev: 59.5,
            reference_high_kev: 1332.5,
        }
    }
}

impl SigmaModel {
    /// Creates a model with the default calibration lines.
    #[must_use]
    pub fn new(a: f64, b: f64) -> Self {
        Self {
            a,
            b,
            ..Self::default()
        }
    }

    /// Sets the calibration energies defining the reference span.
    #[must_use]
    pub fn with_reference(mut self, low_kev: f64, high_kev: f64) -> Self {
        self.reference_low_kev = low_kev;
        self.reference_high_kev = high_kev;
        self
    }

    /// Width of the calibration interval in keV.
    #[inline]
    #[must_use]
    pub fn reference_span(&self) -> f64 {
        self.reference_high_kev - self.reference_low_kev
    }

    /// Standard deviation in keV for a true energy in keV.
    #[inline]
    #[must_use]
    pub fn sigma(&self, energy_kev: f64) -> f64 {
        self.a + energy_kev * (self.b / self.reference_span())
    }

    /// Checks that sigma is finite and non-negative on `[0, max_energy_kev]`.
    ///
    /// # Errors
    /// Returns [`Error::Config`] for a zero or non-finite span, non-finite
    /// coefficients, or a curve that goes negative inside the domain.
    pub fn validate(&self, max_energy_kev: f64) -> Result<()> {
        let span = self.reference_span();
        if !span.is_finite() || span == 0.0 {
            return Err(Error::Config(format!(
                "sigma reference span must be finite and non-zero, got {span}"
            )));
        }
        if !self.a.is_finite() || !self.b.is_finite() {
            return Err(Error::Config(format!(
                "sigma coefficients must be finite, got a={} b={}",
                self.a, self.b
            )));
        }
        // Linear, so the extremes are at the domain edges.
        let low = self.sigma(0.0);
        let high = self.sigma(max_energy_kev);
        if low < 0.0 || high < 0.0 {
            return Err(Error::Config(format!(
                "sigma becomes negative on [0, {max_energy_kev}] keV (sigma(0)={low}, sigma(max)={high})"
            )));
        }
        Ok(())
    }
}

/// Source of normally distributed samples.
pub trait GaussianSampler {
    /// Draws one sample from `N(mean, sigma^2)`.
    ///
    /// # Errors
    /// Returns [`Error::RandomSource`] if the parameters are rejected or the
    /// source fails. Such failures are fatal to a run.
    fn sample(&mut self, mean: f64, sigma: f64) -> Result<f64>;
}

impl<S: GaussianSampler + ?Sized> GaussianSampler for &mut S {
    fn sample(&mut self, mean: f64, sigma: f64) -> Result<f64> {
        (**self).sample(mean, sigma)
    }
}

/// [`GaussianSampler`] backed by `rand_distr::Normal`.
#[derive(Debug, Clone)]
pub struct NormalSampler<R = StdRng> {
    rng: R,
}

impl NormalSampler<StdRng> {
    /// Creates a reproducible sampler from a seed.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Creates a sampler seeded from the operating system.
    #[must_use]
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl<R: Rng> NormalSampler<R> {
    /// Wraps an existing generator.
    pub fn with_rng(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: Rng> GaussianSampler for NormalSampler<R> {
    fn sample(&mut self, mean: f64, sigma: f64) -> Result<f64> {
        let normal = Normal::new(mean, sigma)
            .map_err(|e| Error::RandomSource(format!("N({mean}, {sigma}): {e}")))?;
        Ok(normal.sample(&mut self.rng))
    }
}

/// Turns true deposited energies into simulated measured energies.
#[derive(Debug, Clone)]
pub struct EnergyResolutionModel<S> {
    sigma: SigmaModel,
    sampler: S,
}

impl<S: GaussianSampler> EnergyResolutionModel<S> {
    /// Creates a model from a sigma curve and a random source.
    pub fn new(sigma: SigmaModel, sampler: S) -> Self {
        Self { sigma, sampler }
    }

    /// Returns the sigma curve.
    pub fn sigma_model(&self) -> &SigmaModel {
        &self.sigma
    }

    /// Smears a true energy.
    ///
    /// Non-positive energies are defined to smear to zero without drawing a
    /// sample; positive energies return `E + g` with `g ~ N(0, sigma(E))`.
    /// Sigma is clamped at zero, since a curve validated only up to the
    /// spectrum domain may go negative for an event sum above it.
    ///
    /// # Errors
    /// Propagates [`Error::RandomSource`] from the sampler.
    pub fn smear(&mut self, true_energy: f64) -> Result<f64> {
        if true_energy <= 0.0 {
            return Ok(0.0);
        }
        let sigma = self.sigma.sigma(true_energy).max(0.0);
        let offset = self.sampler.sample(0.0, sigma)?;
        Ok(true_energy + offset)
    }

    /// Consumes the model and returns the sampler.
    pub fn into_sampler(self) -> S {
        self.sampler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct Zero;

    impl GaussianSampler for Zero {
        fn sample(&mut self, mean: f64, _sigma: f64) -> Result<f64> {
            Ok(mean)
        }
    }

    /// Returns `mean + k * sigma` and records every call.
    struct Scaled {
        k: f64,
        calls: Vec<(f64, f64)>,
    }

    impl GaussianSampler for Scaled {
        fn sample(&mut self, mean: f64, sigma: f64) -> Result<f64> {
            self.calls.push((mean, sigma));
            Ok(mean + self.k * sigma)
        }
    }

    #[test]
    fn test_sigma_curve() {
        let model = SigmaModel::new(1.0, 2.0);
        assert_relative_eq!(model.reference_span(), 1273.0);
        assert_relative_eq!(model.sigma(0.0), 1.0);
        assert_relative_eq!(model.sigma(1273.0), 3.0);
        assert_relative_eq!(model.sigma(636.5), 2.0);
    }

    #[test]
    fn test_validate() {
        SigmaModel::default().validate(2048.0).unwrap();
        assert!(SigmaModel::new(0.0, 0.0).validate(2048.0).is_ok());
        assert!(SigmaModel::new(1.0, 1.0)
            .with_reference(100.0, 100.0)
            .validate(2048.0)
            .is_err());
        assert!(SigmaModel::new(f64::NAN, 1.0).validate(2048.0).is_err());
        assert!(SigmaModel::new(-0.1, 1.0).validate(2048.0).is_err());
        // Negative slope crossing zero inside the domain.
        assert!(SigmaModel::new(1.0, -1.0).validate(2048.0).is_err());
    }

    #[test]
    fn test_zero_sampler_is_identity() {
        let mut model = EnergyResolutionModel::new(SigmaModel::default(), Zero);
        for e in [0.5, 59.5, 1000.0, 1332.5, 2047.9] {
            assert_relative_eq!(model.smear(e).unwrap(), e);
        }
    }

    #[test]
    fn test_non_positive_energy_not_sampled() {
        let sampler = Scaled {
            k: 1.0,
            calls: Vec::new(),
        };
        let mut model = EnergyResolutionModel::new(SigmaModel::default(), sampler);
        assert_eq!(model.smear(0.0).unwrap(), 0.0);
        assert_eq!(model.smear(-5.0).unwrap(), 0.0);
        assert!(model.into_sampler().calls.is_empty());
    }

    #[test]
    fn test_smear_uses_sigma_of_true_energy() {
        let sigma = SigmaModel::new(1.0, 2.0);
        let sampler = Scaled {
            k: 2.0,
            calls: Vec::new(),
        };
        let mut model = EnergyResolutionModel::new(sigma, sampler);
        let e = 1273.0;
        assert_relative_eq!(model.smear(e).unwrap(), e + 6.0);

        let calls = model.into_sampler().calls;
        assert_eq!(calls.len(), 1);
        assert_relative_eq!(calls[0].0, 0.0);
        assert_relative_eq!(calls[0].1, 3.0);
    }

    #[test]
    fn test_negative_sigma_above_domain_clamped() {
        let sigma = SigmaModel::new(10.0, -5.0);
        sigma.validate(2048.0).unwrap();
        assert!(sigma.sigma(3000.0) < 0.0);

        let sampler = Scaled {
            k: 1.0,
            calls: Vec::new(),
        };
        let mut model = EnergyResolutionModel::new(sigma, sampler);
        assert_relative_eq!(model.smear(3000.0).unwrap(), 3000.0);
        let calls = model.into_sampler().calls;
        assert_relative_eq!(calls[0].1, 0.0);

        let mut model = EnergyResolutionModel::new(sigma, NormalSampler::seeded(3));
        assert_relative_eq!(model.smear(3000.0).unwrap(), 3000.0);
    }

    #[test]
    fn test_normal_sampler_reproducible() {
        let mut a = NormalSampler::seeded(42);
        let mut b = NormalSampler::seeded(42);
        for _ in 0..16 {
            assert_eq!(a.sample(0.0, 1.5).unwrap(), b.sample(0.0, 1.5).unwrap());
        }
    }

    #[test]
    fn test_normal_sampler_spread() {
        let mut sampler = NormalSampler::seeded(7);
        let n: u32 = 20_000;
        let samples: Vec<f64> = (0..n).map(|_| sampler.sample(100.0, 2.0).unwrap()).collect();
        let mean = samples.iter().sum::<f64>() / f64::from(n);
        let var = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / f64::from(n);
        assert!((mean - 100.0).abs() < 0.1, "mean {mean}");
        assert!((var.sqrt() - 2.0).abs() < 0.1, "sigma {}", var.sqrt());
    }

    #[test]
    fn test_normal_sampler_rejects_bad_sigma() {
        let mut sampler = NormalSampler::seeded(1);
        let err = sampler.sample(0.0, f64::NAN).unwrap_err();
        assert!(matches!(err, Error::RandomSource(_)));
        assert!(!err.is_recoverable());
    }
}
