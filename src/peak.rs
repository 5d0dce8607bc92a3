//! Gaussian peak on a linear background
//!
//! The model is
//! $$
//!     f(x) = a + b x + c \exp\left[-\frac{(x - x_c)^2}{2 s^2}\right]
//! $$
//! fitted by weighted least squares with a Gauss-Newton iteration. Parameter errors come from
//! the covariance $(J^T J)^{-1} \chi^2 / (n - 5)$ of the weighted Jacobian at the solution.
use std::f64::consts::PI;
use std::path::Path;

use argmin::core::{Executor, Jacobian, Operator, State};
use argmin::solver::gaussnewton::GaussNewtonLS;
use argmin::solver::linesearch::MoreThuenteLineSearch;
use ndarray::{Array1, Array2};
use ndarray_linalg::Inverse;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;
use crate::measurement::Measurement;
use crate::report::{ParsedReport, Report};
use crate::spectrum::Spectrum;
use crate::Result;

const NUM_PARAMETERS: usize = 5;

/// The five model parameters, in the order `a, b, c, xc, s`
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeakParameters {
    /// Background offset `a`
    pub offset: f64,
    /// Background slope `b`
    pub slope: f64,
    /// Peak height `c`, negative for a deficit
    pub amplitude: f64,
    /// Peak centre `xc`
    pub centre: f64,
    /// Peak width `s`
    pub width: f64,
}

impl PeakParameters {
    pub fn evaluate(&self, x: f64) -> f64 {
        self.slope.mul_add(x, self.offset) + self.peak(x)
    }

    /// The Gaussian term alone
    pub fn peak(&self, x: f64) -> f64 {
        self.amplitude * (-(x - self.centre).powi(2) / (2. * self.width.powi(2))).exp()
    }

    fn to_array(self) -> Array1<f64> {
        Array1::from_vec(vec![
            self.offset,
            self.slope,
            self.amplitude,
            self.centre,
            self.width,
        ])
    }

    fn from_array(p: &Array1<f64>) -> Self {
        Self {
            offset: p[0],
            slope: p[1],
            amplitude: p[2],
            centre: p[3],
            width: p[4],
        }
    }
}

/// Iteration controls for the Gauss-Newton solver
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    pub max_iters: u64,
    pub tolerance: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iters: 100,
            tolerance: f64::EPSILON.sqrt(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PeakFit {
    pub parameters: PeakParameters,
    /// One-sigma error of each parameter
    pub errors: PeakParameters,
    pub chi_squared: f64,
    pub degrees_of_freedom: usize,
    pub iterations: u64,
}

impl PeakFit {
    pub const fn centre(&self) -> Measurement<f64> {
        Measurement::new(self.parameters.centre, self.errors.centre)
    }

    /// Integral of the Gaussian term, `c √(2π) s`
    ///
    /// The error combines those of `c` and `s` in quadrature.
    pub fn area(&self) -> Measurement<f64> {
        let root_two_pi = (2. * PI).sqrt();
        let (c, s) = (self.parameters.amplitude, self.parameters.width);
        Measurement {
            value: c * root_two_pi * s,
            uncertainty: (root_two_pi * s * self.errors.amplitude)
                .hypot(c * root_two_pi * self.errors.width),
        }
    }

    /// Write the fit in the `key: value +- error` layout read back by [`PeakFit::centre_from_report`]
    pub fn write_report(&self, path: &Path, name: &str, reference_energy: f64) -> Result<()> {
        let (p, e) = (self.parameters, self.errors);
        Report::new(format!("Fitted parameters for {name}"))
            .rule()
            .measurement("a (offset)", Measurement::new(p.offset, e.offset), 4, None)
            .measurement(
                "b (background slope)",
                Measurement::new(p.slope, e.slope),
                4,
                None,
            )
            .measurement(
                "c (peak height)",
                Measurement::new(p.amplitude, e.amplitude),
                4,
                None,
            )
            .measurement(
                "xc (peak center)",
                Measurement::new(p.centre, e.centre),
                4,
                Some("channel"),
            )
            .measurement(
                "s (peak width)",
                Measurement::new(p.width, e.width),
                4,
                Some("channel"),
            )
            .rule()
            .value("Gaussian peak energy", format!("{reference_energy} keV"))
            .write(path)
    }

    /// Fitted parameters from a report written by [`PeakFit::write_report`]
    pub fn parameters_from_report(path: &Path) -> Result<PeakParameters> {
        let report = ParsedReport::read(path)?;
        Ok(PeakParameters {
            offset: report.get("a (offset)")?.value,
            slope: report.get("b (background slope)")?.value,
            amplitude: report.get("c (peak height)")?.value,
            centre: report.get("xc (peak center)")?.value,
            width: report.get("s (peak width)")?.value,
        })
    }

    /// Fitted centre and reference energy (keV) from a report written by [`PeakFit::write_report`]
    pub fn centre_from_report(path: &Path) -> Result<(Measurement<f64>, f64)> {
        let report = ParsedReport::read(path)?;
        let centre = report.get("xc (peak center)")?;
        let energy = report.get("Gaussian peak energy")?;
        Ok((centre, energy.value))
    }
}

/// Weighted residuals of the model against a set of observations
#[derive(Clone)]
struct Problem {
    x: Array1<f64>,
    y: Array1<f64>,
    /// Reciprocal of the per-point error
    inverse_sigma: Array1<f64>,
}

impl Problem {
    fn compute(&self, p: &Array1<f64>) -> Array1<f64> {
        let params = PeakParameters::from_array(p);
        self.x.mapv(|x| params.evaluate(x))
    }

    /// Jacobian of the weighted residual vector, one row per observation
    fn weighted_jacobian(&self, p: &Array1<f64>) -> Array2<f64> {
        let params = PeakParameters::from_array(p);
        let mut jacobian = Array2::zeros((self.x.len(), NUM_PARAMETERS));
        for (ii, (&x, &w)) in self.x.iter().zip(&self.inverse_sigma).enumerate() {
            let dx = x - params.centre;
            let gaussian = (-dx.powi(2) / (2. * params.width.powi(2))).exp();
            let height = params.amplitude * gaussian;
            let row = [
                1.,
                x,
                gaussian,
                height * dx / params.width.powi(2),
                height * dx.powi(2) / params.width.powi(3),
            ];
            for (jj, derivative) in row.into_iter().enumerate() {
                jacobian[[ii, jj]] = derivative * w;
            }
        }
        jacobian
    }
}

impl Operator for Problem {
    type Param = Array1<f64>;
    type Output = Array1<f64>;

    fn apply(&self, p: &Self::Param) -> ::std::result::Result<Self::Output, argmin::core::Error> {
        Ok((self.compute(p) - &self.y) * &self.inverse_sigma)
    }
}

impl Jacobian for Problem {
    type Param = Array1<f64>;
    type Jacobian = Array2<f64>;

    fn jacobian(
        &self,
        p: &Self::Param,
    ) -> ::std::result::Result<Self::Jacobian, argmin::core::Error> {
        Ok(self.weighted_jacobian(p))
    }
}

/// Fit the model to the bins of `spectrum` whose channel lies in `[min, max]`
///
/// Bin errors weight the fit. Empty bins have zero Poisson error; they are weighted as if their
/// error were one count.
pub fn fit_window(
    spectrum: &Spectrum,
    window: (u32, u32),
    initial: PeakParameters,
    settings: SolverSettings,
) -> Result<PeakFit> {
    let (x, (y, sigma)): (Vec<f64>, (Vec<f64>, Vec<f64>)) = spectrum
        .window(window.0, window.1)
        .map(|bin| {
            let sigma = if bin.error > 0. { bin.error } else { 1. };
            (f64::from(bin.channel), (bin.counts, sigma))
        })
        .unzip();
    debug!(
        name = spectrum.name(),
        points = x.len(),
        min = window.0,
        max = window.1,
        "fitting peak window"
    );
    fit(&x, &y, &sigma, initial, settings)
}

/// Weighted least squares fit of the Gaussian plus linear background
///
/// # Errors
/// - [`Error::InsufficientData`] with fewer than six points
/// - [`Error::FitDidNotConverge`] if the solver fails, runs out of iterations, or ends on a
///   point where the parameter covariance cannot be evaluated
pub fn fit(
    x: &[f64],
    y: &[f64],
    sigma: &[f64],
    initial: PeakParameters,
    settings: SolverSettings,
) -> Result<PeakFit> {
    if x.len() != y.len() || x.len() != sigma.len() {
        return Err(Error::InvalidInput("peak fit inputs have mismatched lengths".into()).into());
    }
    if x.len() <= NUM_PARAMETERS {
        return Err(Error::InsufficientData {
            needed: NUM_PARAMETERS + 1,
            found: x.len(),
        }
        .into());
    }
    if sigma.iter().any(|s| *s <= 0. || !s.is_finite()) {
        return Err(Error::InvalidInput("errors must be positive".into()).into());
    }

    let problem = Problem {
        x: Array1::from_vec(x.to_vec()),
        y: Array1::from_vec(y.to_vec()),
        inverse_sigma: sigma.iter().map(|s| s.recip()).collect(),
    };

    let linesearch = MoreThuenteLineSearch::new().with_bounds(0.0, 1.0)?;
    let solver = GaussNewtonLS::new(linesearch).with_tolerance(settings.tolerance)?;

    let res = Executor::new(problem.clone(), solver)
        .configure(|state| state.param(initial.to_array()).max_iters(settings.max_iters))
        .run()
        .map_err(|e| Error::FitDidNotConverge(e.to_string()))?;

    let mut state = res.state().clone();
    let iterations = state.get_iter();
    if iterations >= settings.max_iters {
        return Err(Error::FitDidNotConverge(format!(
            "no convergence after {iterations} iterations"
        ))
        .into());
    }
    let solution = state
        .take_param()
        .ok_or_else(|| Error::FitDidNotConverge("solver returned no parameters".into()))?;
    if solution.iter().any(|p| !p.is_finite()) || solution[4] == 0. {
        return Err(Error::FitDidNotConverge(format!("degenerate solution {solution}")).into());
    }

    let residuals = problem.apply(&solution)?;
    let chi_squared = residuals.dot(&residuals);
    let degrees_of_freedom = x.len() - NUM_PARAMETERS;

    let jacobian = problem.weighted_jacobian(&solution);
    let curvature = jacobian.t().dot(&jacobian);
    let covariance = curvature
        .inv()
        .map_err(|e| Error::FitDidNotConverge(format!("singular curvature matrix: {e}")))?;
    #[allow(clippy::cast_precision_loss)]
    let covariance = covariance * (chi_squared / degrees_of_freedom as f64);
    let errors = covariance.diag().mapv(f64::sqrt);
    if errors.iter().any(|e| !e.is_finite()) {
        return Err(Error::FitDidNotConverge("parameter covariance is not finite".into()).into());
    }

    let mut parameters = PeakParameters::from_array(&solution);
    // The model only depends on s squared
    parameters.width = parameters.width.abs();
    let errors = PeakParameters::from_array(&errors);

    debug!(iterations, chi_squared, "peak fit converged");
    Ok(PeakFit {
        parameters,
        errors,
        chi_squared,
        degrees_of_freedom,
        iterations,
    })
}
