//! Straight line least squares
//!
//! Lines are fitted through the normal equations of the degree one Vandermonde matrix. The
//! parameter covariance is scaled by the reduced chi-squared of the fit, so supplied errors act
//! as relative weights.
use ndarray::{Array1, Array2, Axis};
use ndarray_linalg::Inverse;

use crate::error::Error;
use crate::math::vandermonde;
use crate::measurement::Measurement;
use crate::Result;

#[derive(Clone, Debug)]
pub struct LinearFit {
    pub slope: Measurement<f64>,
    pub intercept: Measurement<f64>,
    pub chi_squared: f64,
    pub degrees_of_freedom: usize,
}

impl LinearFit {
    pub fn evaluate(&self, x: f64) -> f64 {
        self.slope.value.mul_add(x, self.intercept.value)
    }

    /// Abscissa where the line crosses zero
    ///
    /// The uncertainty treats slope and intercept as uncorrelated.
    pub fn x_intercept(&self) -> Measurement<f64> {
        let (m, c) = (self.slope, self.intercept);
        Measurement {
            value: -c.value / m.value,
            uncertainty: (c.uncertainty / m.value).hypot(c.value * m.uncertainty / m.value.powi(2)),
        }
    }
}

/// Fit `y = slope * x + intercept`
///
/// `sigma` holds optional per-point errors. With as many points as parameters the solution is
/// exact and the covariance is undefined, it is reported as infinite.
///
/// # Errors
/// - The inputs must have equal lengths and at least two points
/// - Errors must be strictly positive
/// - The abscissae must not all coincide
pub fn fit_line(x: &[f64], y: &[f64], sigma: Option<&[f64]>) -> Result<LinearFit> {
    if x.len() != y.len() || sigma.is_some_and(|s| s.len() != x.len()) {
        return Err(Error::InvalidInput(format!(
            "fit inputs have mismatched lengths {} and {}",
            x.len(),
            y.len()
        ))
        .into());
    }
    if x.len() < 2 {
        return Err(Error::InsufficientData {
            needed: 2,
            found: x.len(),
        }
        .into());
    }

    let weights: Array1<f64> = match sigma {
        Some(sigma) => {
            if sigma.iter().any(|s| *s <= 0. || !s.is_finite()) {
                return Err(Error::InvalidInput("errors must be positive".into()).into());
            }
            sigma.iter().map(|s| s.powi(-2)).collect()
        }
        None => Array1::ones(x.len()),
    };

    let design = vandermonde(x, 1)?;
    let weighted_design = &design * &weights.view().insert_axis(Axis(1));
    let observations = Array1::from_vec(y.to_vec());

    let normal = design.t().dot(&weighted_design);
    let inverse = normal.inv()?;
    let solution = inverse.dot(&weighted_design.t().dot(&observations));
    if solution.iter().any(|p| !p.is_finite()) {
        return Err(Error::InvalidInput("abscissae are degenerate".into()).into());
    }

    let residuals = &observations - &design.dot(&solution);
    let chi_squared = (&residuals * &residuals * &weights).sum();
    let degrees_of_freedom = x.len() - 2;

    #[allow(clippy::cast_precision_loss)]
    let covariance = if degrees_of_freedom > 0 {
        inverse * (chi_squared / degrees_of_freedom as f64)
    } else {
        Array2::from_elem((2, 2), f64::INFINITY)
    };

    Ok(LinearFit {
        slope: Measurement::new(solution[1], covariance[[1, 1]].sqrt()),
        intercept: Measurement::new(solution[0], covariance[[0, 0]].sqrt()),
        chi_squared,
        degrees_of_freedom,
    })
}
