//! Fitting configuration.
//!
//! `FittingOptions` is built once per analysis run through
//! [`FittingOptionsBuilder`] and is read-only afterwards. Validation happens in
//! `build()`: invalid settings fail there instead of being silently reset to
//! defaults later.
//!
//! The JSON surface (`FittingOptionsConfig`) mirrors the external
//! configuration keys (`initParams`, `KDBound`, `punishUpper`, ...).

use serde::{Deserialize, Serialize};

use crate::error::{KineticsError, Result};

/// One optimizer start: `(Rmax scale, log10 kon, log10 koff)`.
///
/// The Rmax scale is relative to the normalized response (max observed = 1).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InitialGuess {
    pub rmax_scale: f64,
    pub log10_kon: f64,
    pub log10_koff: f64,
}

impl InitialGuess {
    pub fn new(rmax_scale: f64, log10_kon: f64, log10_koff: f64) -> Self {
        Self {
            rmax_scale,
            log10_kon,
            log10_koff,
        }
    }
}

impl From<[f64; 3]> for InitialGuess {
    fn from(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

/// Closed box `[lower, upper]` for one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub lower: f64,
    pub upper: f64,
}

impl Bound {
    pub const fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    pub fn clamp(&self, v: f64) -> f64 {
        v.clamp(self.lower, self.upper)
    }

    pub fn contains(&self, v: f64) -> bool {
        v >= self.lower && v <= self.upper
    }

    fn is_valid(&self) -> bool {
        self.lower.is_finite() && self.upper.is_finite() && self.lower < self.upper
    }
}

/// Box bounds on the optimizer's parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterBounds {
    pub rmax_scale: Bound,
    pub log10_kon: Bound,
    pub log10_koff: Bound,
}

impl Default for ParameterBounds {
    fn default() -> Self {
        Self {
            rmax_scale: Bound::new(1e-3, 1e3),
            log10_kon: Bound::new(0.0, 9.0),
            log10_koff: Bound::new(-7.0, 1.0),
        }
    }
}

pub const DEFAULT_KD_BOUND: f64 = -12.0;
pub const DEFAULT_PUNISH_LOWER: f64 = -11.0;
pub const DEFAULT_PUNISH_UPPER: f64 = -3.0;
pub const DEFAULT_PUNISH_K: f64 = 5.0;
pub const DEFAULT_PUNISH_LAMBDA: f64 = 1e-3;
pub const DEFAULT_EPS: f64 = 1e-6;
pub const DEFAULT_MAX_ITERATIONS: usize = 500;

pub fn default_init_params() -> Vec<InitialGuess> {
    vec![
        InitialGuess::new(1.0, 5.0, -3.0),
        InitialGuess::new(1.0, 3.0, -2.0),
        InitialGuess::new(1.0, 6.0, -4.0),
    ]
}

/// Validated, immutable fitting configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FittingOptions {
    init_params: Vec<InitialGuess>,
    #[serde(rename = "KDBound")]
    kd_bound: f64,
    punish_lower: f64,
    punish_upper: f64,
    punish_k: f64,
    punish_lambda: f64,
    eps: f64,
    bounds: ParameterBounds,
    max_iterations: usize,
    partial_kd_bound: bool,
}

impl Default for FittingOptions {
    fn default() -> Self {
        Self {
            init_params: default_init_params(),
            kd_bound: DEFAULT_KD_BOUND,
            punish_lower: DEFAULT_PUNISH_LOWER,
            punish_upper: DEFAULT_PUNISH_UPPER,
            punish_k: DEFAULT_PUNISH_K,
            punish_lambda: DEFAULT_PUNISH_LAMBDA,
            eps: DEFAULT_EPS,
            bounds: ParameterBounds::default(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            partial_kd_bound: false,
        }
    }
}

impl FittingOptions {
    pub fn builder() -> FittingOptionsBuilder {
        FittingOptionsBuilder::default()
    }

    /// Parse the JSON configuration surface.
    pub fn from_json_str(json: &str) -> Result<Self> {
        FittingOptionsConfig::from_json_str(json)?.into_builder().build()
    }

    pub fn init_params(&self) -> &[InitialGuess] {
        &self.init_params
    }

    /// Lower bound on `log10(KD) = log10 koff - log10 kon`.
    pub fn kd_bound(&self) -> f64 {
        self.kd_bound
    }

    pub fn punish_lower(&self) -> f64 {
        self.punish_lower
    }

    pub fn punish_upper(&self) -> f64 {
        self.punish_upper
    }

    pub fn punish_k(&self) -> f64 {
        self.punish_k
    }

    pub fn punish_lambda(&self) -> f64 {
        self.punish_lambda
    }

    /// Whether the soft log-KD penalty is added during search.
    pub fn penalized(&self) -> bool {
        self.punish_lambda > 0.0
    }

    /// Finite-difference step of the optimizer.
    pub fn eps(&self) -> f64 {
        self.eps
    }

    pub fn bounds(&self) -> &ParameterBounds {
        &self.bounds
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Partial fits drop the hard KD bound unless this is set.
    pub fn partial_kd_bound(&self) -> bool {
        self.partial_kd_bound
    }
}

/// Builder for [`FittingOptions`]; starts from the defaults.
#[derive(Debug, Clone)]
pub struct FittingOptionsBuilder {
    options: FittingOptions,
}

impl Default for FittingOptionsBuilder {
    fn default() -> Self {
        Self {
            options: FittingOptions::default(),
        }
    }
}

impl FittingOptionsBuilder {
    pub fn init_params<I, G>(mut self, guesses: I) -> Self
    where
        I: IntoIterator<Item = G>,
        G: Into<InitialGuess>,
    {
        self.options.init_params = guesses.into_iter().map(Into::into).collect();
        self
    }

    pub fn kd_bound(mut self, kd_bound: f64) -> Self {
        self.options.kd_bound = kd_bound;
        self
    }

    pub fn punish_window(mut self, lower: f64, upper: f64) -> Self {
        self.options.punish_lower = lower;
        self.options.punish_upper = upper;
        self
    }

    pub fn punish_k(mut self, k: f64) -> Self {
        self.options.punish_k = k;
        self
    }

    pub fn punish_lambda(mut self, lambda: f64) -> Self {
        self.options.punish_lambda = lambda;
        self
    }

    pub fn eps(mut self, eps: f64) -> Self {
        self.options.eps = eps;
        self
    }

    pub fn bounds(mut self, bounds: ParameterBounds) -> Self {
        self.options.bounds = bounds;
        self
    }

    pub fn max_iterations(mut self, n: usize) -> Self {
        self.options.max_iterations = n;
        self
    }

    pub fn partial_kd_bound(mut self, enforce: bool) -> Self {
        self.options.partial_kd_bound = enforce;
        self
    }

    pub fn build(self) -> Result<FittingOptions> {
        let o = self.options;

        if o.init_params.is_empty() {
            return Err(KineticsError::config("At least one initial guess is required."));
        }
        for b in [o.bounds.rmax_scale, o.bounds.log10_kon, o.bounds.log10_koff] {
            if !b.is_valid() {
                return Err(KineticsError::config(format!(
                    "Invalid parameter bound [{}, {}].",
                    b.lower, b.upper
                )));
            }
        }
        for (i, g) in o.init_params.iter().enumerate() {
            let inside = o.bounds.rmax_scale.contains(g.rmax_scale)
                && o.bounds.log10_kon.contains(g.log10_kon)
                && o.bounds.log10_koff.contains(g.log10_koff);
            if !inside {
                return Err(KineticsError::config(format!(
                    "Initial guess #{i} ({}, {}, {}) is outside the parameter bounds.",
                    g.rmax_scale, g.log10_kon, g.log10_koff
                )));
            }
        }
        if !o.kd_bound.is_finite() {
            return Err(KineticsError::config("KD bound must be finite."));
        }
        if o.bounds.log10_koff.upper - o.bounds.log10_kon.lower < o.kd_bound {
            return Err(KineticsError::config(format!(
                "KD bound {} cannot be met inside the rate bounds.",
                o.kd_bound
            )));
        }
        if !(o.punish_lower.is_finite() && o.punish_upper.is_finite() && o.punish_lower < o.punish_upper) {
            return Err(KineticsError::config(format!(
                "Penalty window must satisfy lower < upper (got [{}, {}]).",
                o.punish_lower, o.punish_upper
            )));
        }
        if !(o.punish_k.is_finite() && o.punish_k > 0.0) {
            return Err(KineticsError::config("Penalty steepness must be finite and > 0."));
        }
        if !(o.punish_lambda.is_finite() && o.punish_lambda >= 0.0) {
            return Err(KineticsError::config("Penalty weight must be finite and >= 0."));
        }
        if !(o.eps.is_finite() && o.eps > 0.0 && o.eps < 0.1) {
            return Err(KineticsError::config(format!(
                "Step size eps must be in (0, 0.1) (got {}).",
                o.eps
            )));
        }
        if o.max_iterations == 0 {
            return Err(KineticsError::config("max_iterations must be > 0."));
        }
        Ok(o)
    }
}

/// JSON form of the options; every key is optional and falls back to the default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FittingOptionsConfig {
    pub init_params: Option<Vec<[f64; 3]>>,
    #[serde(rename = "KDBound")]
    pub kd_bound: Option<f64>,
    pub punish_upper: Option<f64>,
    pub punish_lower: Option<f64>,
    pub punish_k: Option<f64>,
    pub punish_lambda: Option<f64>,
    pub eps: Option<f64>,
    pub bounds: Option<ParameterBounds>,
    pub max_iterations: Option<usize>,
    pub partial_kd_bound: Option<bool>,
}

impl FittingOptionsConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| KineticsError::parse(format!("Invalid fitting options JSON: {e}")))
    }

    pub fn into_builder(self) -> FittingOptionsBuilder {
        let defaults = FittingOptions::default();
        let mut b = FittingOptions::builder();
        if let Some(guesses) = self.init_params {
            b = b.init_params(guesses);
        }
        if let Some(v) = self.kd_bound {
            b = b.kd_bound(v);
        }
        b = b.punish_window(
            self.punish_lower.unwrap_or(defaults.punish_lower),
            self.punish_upper.unwrap_or(defaults.punish_upper),
        );
        if let Some(v) = self.punish_k {
            b = b.punish_k(v);
        }
        if let Some(v) = self.punish_lambda {
            b = b.punish_lambda(v);
        }
        if let Some(v) = self.eps {
            b = b.eps(v);
        }
        if let Some(v) = self.bounds {
            b = b.bounds(v);
        }
        if let Some(v) = self.max_iterations {
            b = b.max_iterations(v);
        }
        if let Some(v) = self.partial_kd_bound {
            b = b.partial_kd_bound(v);
        }
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let built = FittingOptions::builder().build().unwrap();
        assert_eq!(built, FittingOptions::default());
        assert!(built.penalized());
    }

    #[test]
    fn empty_guesses_fail_fast() {
        let err = FittingOptions::builder()
            .init_params(Vec::<[f64; 3]>::new())
            .build()
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn inverted_penalty_window_fails() {
        let err = FittingOptions::builder().punish_window(-2.0, -8.0).build().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn out_of_bounds_guess_fails() {
        let err = FittingOptions::builder()
            .init_params([[1.0, 12.0, -3.0]])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("#0"));
    }

    #[test]
    fn bad_eps_fails() {
        assert!(FittingOptions::builder().eps(0.0).build().is_err());
        assert!(FittingOptions::builder().eps(f64::NAN).build().is_err());
    }

    #[test]
    fn json_surface_uses_external_names() {
        let json = r#"{
            "initParams": [[1.0, 4.0, -2.0], [2.0, 6.0, -4.0]],
            "KDBound": -10.0,
            "punishUpper": -4.0,
            "punishLower": -10.0,
            "punishK": 3.0,
            "punishLambda": 0.0,
            "eps": 1e-5
        }"#;
        let o = FittingOptions::from_json_str(json).unwrap();
        assert_eq!(o.init_params().len(), 2);
        assert_eq!(o.init_params()[1], InitialGuess::new(2.0, 6.0, -4.0));
        assert_eq!(o.kd_bound(), -10.0);
        assert_eq!(o.punish_upper(), -4.0);
        assert!(!o.penalized());
        assert_eq!(o.eps(), 1e-5);
        assert_eq!(o.max_iterations(), DEFAULT_MAX_ITERATIONS);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = FittingOptions::from_json_str("{ not json").unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }
}
