//! Kurie linearisation of a beta spectrum
//!
//! With $W = E / m_e c^2 + 1$ the total energy and $P = \sqrt{W^2 - 1}$ the momentum in units
//! of the electron rest mass, an allowed spectrum satisfies
//! $$
//!     \frac{1}{W}\sqrt{\frac{N(E)}{G(Z, W)}} \propto Q - E,
//! $$
//! so the endpoint energy is the x-intercept of a straight line through the transformed counts.
use std::path::Path;

use tracing::debug;

use crate::spectrum::{channel_number, EnergySpectrum};
use crate::spline::{CubicSpline, Extrapolation};
use crate::table;
use crate::Result;

pub const ELECTRON_REST_ENERGY: f64 = 511.;
const HEADER: [&str; 7] = [
    "ChannelNumber",
    "N(E)",
    "W",
    "P",
    "G(Z,W)",
    "Value",
    "Energy(MeV)",
];

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KurieRow {
    pub channel: u32,
    /// Net counts `N(E)`
    pub counts: f64,
    /// Total energy in rest-mass units
    pub total_energy: f64,
    /// Momentum in rest-mass units
    pub momentum: f64,
    /// Interpolated Fermi function `G(Z, W)`
    pub fermi: f64,
    /// `(1/W) √(N / G)`, NaN where `N / G` is negative
    pub value: f64,
    /// Kinetic energy in MeV
    pub energy: f64,
}

impl KurieRow {
    pub fn is_finite(&self) -> bool {
        self.value.is_finite()
    }
}

/// Interpolating spline through a two column `(abscissa, value)` Fermi function table
pub fn load_fermi_table(
    path: &Path,
    header_lines: usize,
    extrapolation: Extrapolation,
) -> Result<CubicSpline> {
    let rows = table::read(path, header_lines, 2)?;
    let (knots, values) = rows.iter().map(|row| (row[0], row[1])).unzip();
    debug!(path = %path.display(), knots = rows.len(), "loaded Fermi table");
    CubicSpline::new(knots, values, extrapolation)
}

/// Kurie transform of every bin of a background-subtracted energy spectrum
///
/// `fermi` maps momentum to `G(Z, W)`; `rest_energy` is the electron rest energy in the energy
/// units of `spectrum` (keV).
pub fn transform(
    spectrum: &EnergySpectrum,
    fermi: &CubicSpline,
    rest_energy: f64,
) -> Vec<KurieRow> {
    spectrum
        .rows
        .iter()
        .map(|row| {
            let counts = row.bin.counts;
            let total_energy = row.energy / rest_energy + 1.;
            let momentum = total_energy.mul_add(total_energy, -1.).sqrt();
            let fermi = fermi.evaluate(momentum);
            let ratio = counts / fermi;
            let value = if ratio < 0. {
                f64::NAN
            } else {
                ratio.sqrt() / total_energy
            };
            KurieRow {
                channel: row.bin.channel,
                counts,
                total_energy,
                momentum,
                fermi,
                value,
                energy: row.energy / 1000.,
            }
        })
        .collect()
}

pub fn write_table(path: &Path, rows: &[KurieRow]) -> Result<()> {
    table::write(
        path,
        &HEADER,
        rows.iter().map(|row| {
            vec![
                row.channel.to_string(),
                row.counts.to_string(),
                row.total_energy.to_string(),
                row.momentum.to_string(),
                row.fermi.to_string(),
                row.value.to_string(),
                row.energy.to_string(),
            ]
        }),
    )
}

/// Read a table written by [`write_table`]
///
/// # Errors
/// [`crate::error::Error::MalformedRow`] when a channel cell is not a non-negative integer.
pub fn read_table(path: &Path) -> Result<Vec<KurieRow>> {
    table::read(path, 1, HEADER.len())?
        .into_iter()
        .enumerate()
        .map(|(ii, row)| {
            Ok(KurieRow {
                channel: channel_number(path, ii + 2, row[0])?,
                counts: row[1],
                total_energy: row[2],
                momentum: row[3],
                fermi: row[4],
                value: row[5],
                energy: row[6],
            })
        })
        .collect()
}

/// One point of the momentum-space Kurie check
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MomentumPoint {
    /// Kinetic energy `T` in MeV
    pub energy: f64,
    /// `√(N(p) / (p² F(Z, T)))`
    pub left: f64,
    /// `Q - T`
    pub right: f64,
}

/// Compare the momentum-space Kurie function against `Q - T`
///
/// The spectrum is converted to momentum space with `N(p) = N(E) P / T`; `fermi` is indexed by
/// the kinetic energy in MeV. Rows where either side is undefined are dropped.
pub fn momentum_form(rows: &[KurieRow], fermi: &CubicSpline, q_value: f64) -> Vec<MomentumPoint> {
    rows.iter()
        .filter(|row| row.energy > 0.)
        .map(|row| {
            let momentum_counts = row.counts * row.momentum / row.energy;
            let fermi = fermi.evaluate(row.energy);
            MomentumPoint {
                energy: row.energy,
                left: (momentum_counts / (row.momentum.powi(2) * fermi)).sqrt(),
                right: q_value - row.energy,
            }
        })
        .filter(|point| point.left.is_finite())
        .collect()
}
