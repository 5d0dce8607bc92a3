use ndarray::{Array, Array2};
use ndarray_linalg::Scalar;

use crate::Result;

/// Design matrix of a polynomial of `degree` sampled at `x`
///
/// Row `i` holds the powers `x[i]^0 ..= x[i]^degree`, so the matrix is `n x (degree + 1)`.
///
/// ```
/// use kurie_lab::math::vandermonde;
/// use ndarray::arr2;
///
/// let vander = vandermonde(&[2., 3.], 2).unwrap();
/// assert_eq!(vander, arr2(&[[1., 2., 4.], [1., 3., 9.]]));
/// ```
///
/// # Errors
/// `degree` does not fit in an `i32`.
pub fn vandermonde<T: Copy + Scalar>(x: &[T], degree: usize) -> Result<Array2<T>> {
    let max_power = i32::try_from(degree)?;
    let vals = x
        .iter()
        .flat_map(|xi| (0..=max_power).map(move |power| xi.powi(power)));

    Ok(Array::from_iter(vals).into_shape((x.len(), degree + 1))?)
}

/// Evenly spaced grid from `start` to `stop` inclusive.
///
/// The number of steps is rounded to the nearest integer so accumulated floating point error
/// never adds or drops an endpoint.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn inclusive_grid(start: f64, stop: f64, step: f64) -> Vec<f64> {
    if step <= 0. || stop < start {
        return vec![start];
    }
    let steps = ((stop - start) / step).round() as usize;
    (0..=steps).map(|k| step.mul_add(k as f64, start)).collect()
}

/// Evenly spaced samples over `[start, stop]`, `num` points including both ends
#[allow(clippy::cast_precision_loss)]
pub fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    match num {
        0 => vec![],
        1 => vec![start],
        _ => {
            let step = (stop - start) / (num - 1) as f64;
            (0..num).map(|k| step.mul_add(k as f64, start)).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{inclusive_grid, linspace, vandermonde};

    use itertools::Itertools;
    use ndarray_linalg::Determinant;
    use ndarray_rand::rand::{Rng, SeedableRng};
    use rand_isaac::isaac64::Isaac64Rng;

    #[test]
    fn straight_line_design_matrix_has_a_unit_column() {
        let channels = [175., 190.5, 230.];
        let design = vandermonde(&channels, 1).unwrap();

        assert_eq!(design.dim(), (3, 2));
        for (row, channel) in design.rows().into_iter().zip(channels) {
            assert_eq!(row[0], 1.);
            assert_eq!(row[1], channel);
        }
    }

    #[test]
    fn square_design_matrix_determinant_is_the_product_of_differences() {
        let mut rng = Isaac64Rng::seed_from_u64(40);
        let samples = (0..4).map(|_| rng.gen()).collect::<Vec<f64>>();

        let determinant = vandermonde(&samples, 3).unwrap().det().unwrap();
        let product_of_differences: f64 = samples
            .iter()
            .tuple_combinations()
            .map(|(a, b)| b - a)
            .product();

        approx::assert_relative_eq!(determinant, product_of_differences, max_relative = 1e-8);
    }

    #[test]
    fn grids_keep_both_endpoints() {
        let grid = inclusive_grid(0.1, 0.3, 0.01);
        assert_eq!(grid.len(), 21);
        approx::assert_relative_eq!(grid[0], 0.1);
        approx::assert_relative_eq!(grid[20], 0.3, max_relative = 1e-12);

        assert_eq!(inclusive_grid(0.4, 0.4, 0.01), vec![0.4]);
    }

    #[test]
    fn linspace_spans_the_interval() {
        let samples = linspace(0., 1., 5);
        assert_eq!(samples, vec![0., 0.25, 0.5, 0.75, 1.]);
        assert!(linspace(0., 1., 0).is_empty());
    }
}
