//! Cubic spline interpolation of tabulated functions
//!
//! The spline uses not-a-knot end conditions: the third derivative is continuous across the
//! second and penultimate knots. Outside the tabulated range the spline is either continued as
//! a straight line with the end slope, or held at the end value.
use ndarray::{Array1, Array2};
use ndarray_linalg::Solve;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::Result;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Extrapolation {
    /// Continue with the slope at the nearest end
    #[default]
    Linear,
    /// Hold the value at the nearest end
    Constant,
}

#[derive(Clone, Debug)]
pub struct CubicSpline {
    knots: Vec<f64>,
    values: Vec<f64>,
    /// Second derivative at every knot
    curvature: Vec<f64>,
    extrapolation: Extrapolation,
}

impl CubicSpline {
    /// # Errors
    /// - Fewer than two knots, or knots and values of different lengths
    /// - Knots that are not strictly increasing
    pub fn new(knots: Vec<f64>, values: Vec<f64>, extrapolation: Extrapolation) -> Result<Self> {
        if knots.len() != values.len() || knots.len() < 2 {
            return Err(Error::InvalidInput(format!(
                "a spline needs at least two knots with one value each, found {} and {}",
                knots.len(),
                values.len()
            ))
            .into());
        }
        if knots.windows(2).any(|pair| pair[1] <= pair[0]) {
            return Err(
                Error::InvalidInput("spline knots must be strictly increasing".into()).into(),
            );
        }

        let curvature = second_derivatives(&knots, &values)?;
        Ok(Self {
            knots,
            values,
            curvature,
            extrapolation,
        })
    }

    pub fn evaluate(&self, x: f64) -> f64 {
        let n = self.knots.len();
        let (first, last) = (self.knots[0], self.knots[n - 1]);
        if x < first || x > last {
            let (edge, ii) = if x < first { (first, 0) } else { (last, n - 2) };
            let value = self.evaluate_segment(ii, edge);
            return match self.extrapolation {
                Extrapolation::Constant => value,
                Extrapolation::Linear => self.derivative_segment(ii, edge).mul_add(x - edge, value),
            };
        }
        self.evaluate_segment(self.segment(x), x)
    }

    /// Index of the interval `[x_i, x_{i+1}]` holding `x`
    fn segment(&self, x: f64) -> usize {
        let upper = self.knots.partition_point(|&knot| knot <= x);
        upper.clamp(1, self.knots.len() - 1) - 1
    }

    fn evaluate_segment(&self, ii: usize, x: f64) -> f64 {
        let (x0, x1) = (self.knots[ii], self.knots[ii + 1]);
        let (y0, y1) = (self.values[ii], self.values[ii + 1]);
        let (m0, m1) = (self.curvature[ii], self.curvature[ii + 1]);
        let h = x1 - x0;
        let (a, b) = (x1 - x, x - x0);
        m0 * a.powi(3) / (6. * h)
            + m1 * b.powi(3) / (6. * h)
            + (y0 / h - m0 * h / 6.) * a
            + (y1 / h - m1 * h / 6.) * b
    }

    fn derivative_segment(&self, ii: usize, x: f64) -> f64 {
        let (x0, x1) = (self.knots[ii], self.knots[ii + 1]);
        let (y0, y1) = (self.values[ii], self.values[ii + 1]);
        let (m0, m1) = (self.curvature[ii], self.curvature[ii + 1]);
        let h = x1 - x0;
        -m0 * (x1 - x).powi(2) / (2. * h) + m1 * (x - x0).powi(2) / (2. * h) + (y1 - y0) / h
            - (m1 - m0) * h / 6.
    }
}

/// Solve for the knot second derivatives
///
/// Two knots give a straight line and three a single parabola; from four knots on the interior
/// continuity equations are closed by the not-a-knot conditions.
fn second_derivatives(x: &[f64], y: &[f64]) -> Result<Vec<f64>> {
    let n = x.len();
    if n == 2 {
        return Ok(vec![0.; 2]);
    }
    let h = x.windows(2).map(|pair| pair[1] - pair[0]).collect::<Vec<_>>();

    let mut matrix = Array2::<f64>::zeros((n, n));
    let mut rhs = Array1::<f64>::zeros(n);
    for ii in 1..n - 1 {
        matrix[[ii, ii - 1]] = h[ii - 1];
        matrix[[ii, ii]] = 2. * (h[ii - 1] + h[ii]);
        matrix[[ii, ii + 1]] = h[ii];
        rhs[ii] = 6. * ((y[ii + 1] - y[ii]) / h[ii] - (y[ii] - y[ii - 1]) / h[ii - 1]);
    }

    if n == 3 {
        // Constant curvature
        matrix[[0, 0]] = 1.;
        matrix[[0, 1]] = -1.;
        matrix[[2, 1]] = 1.;
        matrix[[2, 2]] = -1.;
    } else {
        matrix[[0, 0]] = h[1];
        matrix[[0, 1]] = -(h[0] + h[1]);
        matrix[[0, 2]] = h[0];
        matrix[[n - 1, n - 3]] = h[n - 2];
        matrix[[n - 1, n - 2]] = -(h[n - 3] + h[n - 2]);
        matrix[[n - 1, n - 1]] = h[n - 3];
    }

    Ok(matrix.solve_into(rhs)?.to_vec())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{CubicSpline, Extrapolation};

    fn cubic(x: f64) -> f64 {
        0.5 * x.powi(3) - 2. * x.powi(2) + x - 3.
    }

    #[test]
    fn knots_are_reproduced() {
        let knots = vec![0.1, 0.4, 0.5, 1.2, 2.0, 3.1];
        let values = vec![1., 3., -2., 0.5, 4., 4.];
        let spline =
            CubicSpline::new(knots.clone(), values.clone(), Extrapolation::Linear).unwrap();

        for (x, y) in knots.iter().zip(&values) {
            approx::assert_abs_diff_eq!(spline.evaluate(*x), *y, epsilon = 1e-10);
        }
    }

    #[test]
    fn cubics_are_interpolated_exactly() {
        let knots = (0..8).map(|k| f64::from(k) * 0.7 - 1.).collect::<Vec<_>>();
        let values = knots.iter().map(|x| cubic(*x)).collect();
        let spline = CubicSpline::new(knots, values, Extrapolation::Linear).unwrap();

        for x in [-0.9, -0.2, 0.33, 1.5, 3.7] {
            approx::assert_abs_diff_eq!(spline.evaluate(x), cubic(x), epsilon = 1e-9);
        }
    }

    #[test]
    fn three_knots_give_the_parabola() {
        let parabola = |x: f64| 2. * x * x - x + 1.;
        let knots = vec![0., 1., 3.];
        let values = knots.iter().map(|x| parabola(*x)).collect();
        let spline = CubicSpline::new(knots, values, Extrapolation::Linear).unwrap();

        approx::assert_abs_diff_eq!(spline.evaluate(2.), parabola(2.), epsilon = 1e-10);
    }

    #[test]
    fn extrapolation_is_linear_or_constant() {
        let knots = vec![0., 1., 2., 3.];
        let values = vec![0., 2., 4., 6.];
        let linear =
            CubicSpline::new(knots.clone(), values.clone(), Extrapolation::Linear).unwrap();
        let constant = CubicSpline::new(knots, values, Extrapolation::Constant).unwrap();

        approx::assert_abs_diff_eq!(linear.evaluate(4.), 8., epsilon = 1e-10);
        approx::assert_abs_diff_eq!(linear.evaluate(-1.), -2., epsilon = 1e-10);
        approx::assert_abs_diff_eq!(constant.evaluate(4.), 6., epsilon = 1e-10);
        approx::assert_abs_diff_eq!(constant.evaluate(-1.), 0., epsilon = 1e-10);
    }

    #[test]
    fn invalid_tables_are_rejected() {
        assert!(CubicSpline::new(vec![0.], vec![1.], Extrapolation::Linear).is_err());
        assert!(CubicSpline::new(vec![0., 0.], vec![1., 2.], Extrapolation::Linear).is_err());
        assert!(CubicSpline::new(vec![0., 1.], vec![1.], Extrapolation::Linear).is_err());
    }

    proptest! {
        #[test]
        fn straight_lines_are_reproduced_everywhere(
            slope in -10f64..10.,
            intercept in -10f64..10.,
            num_knots in 2..12usize,
            x in -2f64..12.,
        ) {
            #[allow(clippy::cast_precision_loss)]
            let knots = (0..num_knots).map(|k| k as f64).collect::<Vec<_>>();
            let values = knots.iter().map(|k| slope.mul_add(*k, intercept)).collect();
            let spline = CubicSpline::new(knots, values, Extrapolation::Linear).unwrap();

            approx::assert_abs_diff_eq!(
                spline.evaluate(x),
                slope.mul_add(x, intercept),
                epsilon = 1e-8
            );
        }
    }
}
