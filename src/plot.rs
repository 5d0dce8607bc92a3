//! SVG figures for every stage
//!
//! All figures share a white background, a caption-free layout and a single legend box. Counts
//! can be shown on a logarithmic axis, in which case empty bins are left out.
use std::ops::Range;
use std::path::Path;

use plotters::coord::ranged1d::{AsRangedCoord, Ranged, ValueFormatter};
use plotters::coord::types::RangedCoordf64;
use plotters::coord::Shift;
use plotters::prelude::*;
use tracing::debug;

use crate::calibration::EnergyCalibration;
use crate::config::Annotation;
use crate::kurie::{KurieRow, MomentumPoint};
use crate::math::linspace;
use crate::measurement::Measurement;
use crate::peak::PeakParameters;
use crate::qvalue::{Quantity, WindowFit};
use crate::Result;

const FIT_RED: RGBColor = RGBColor(0xAD, 0x36, 0x28);
const DATA_GREEN: RGBColor = RGBColor(0x07, 0x49, 0x36);
const LABEL_FONT: (&str, f64) = ("sans-serif", 18.);
const DASH_SEGMENTS: usize = 40;

type Chart<'a, 'b, Y> = ChartContext<'a, SVGBackend<'b>, Cartesian2d<RangedCoordf64, Y>>;

/// One polyline of a figure
pub struct Curve<'a> {
    pub points: Vec<(f64, f64)>,
    pub colour: RGBColor,
    pub label: Option<&'a str>,
}

/// Axis layout shared by the single-axis figures
pub struct Frame<'a> {
    pub size: (u32, u32),
    pub x_desc: &'a str,
    pub y_desc: &'a str,
    pub x_range: Option<Range<f64>>,
    pub log_scale: bool,
}

fn svg_root(path: &Path, size: (u32, u32)) -> Result<DrawingArea<SVGBackend<'_>, Shift>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    debug!(path = %path.display(), "drawing figure");
    let root = SVGBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE)?;
    Ok(root)
}

/// Finite extent of `values`, padded by a tenth on each side
fn extent(values: impl Iterator<Item = f64>) -> Range<f64> {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if lo > hi {
        return 0.0..1.0;
    }
    let pad = if hi > lo { 0.1 * (hi - lo) } else { 1. };
    (lo - pad)..(hi + pad)
}

fn positive_extent(values: impl Iterator<Item = f64>) -> Range<f64> {
    let (lo, hi) = values
        .filter(|v| v.is_finite() && *v > 0.)
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if lo > hi {
        return 0.1..10.0;
    }
    (lo / 2.)..(hi * 2.)
}

fn draw_curves<Y>(chart: &mut Chart<'_, '_, Y>, curves: &[Curve<'_>]) -> Result<()>
where
    Y: Ranged<ValueType = f64>,
{
    for curve in curves {
        let colour = curve.colour;
        let series = chart.draw_series(LineSeries::new(
            curve.points.iter().copied(),
            colour.stroke_width(2),
        ))?;
        if let Some(label) = curve.label {
            series
                .label(label)
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], colour));
        }
    }
    Ok(())
}

/// An arrow pointing at the curve, with its label at the tail `offset` away
fn draw_annotations<Y>(
    chart: &mut Chart<'_, '_, Y>,
    annotations: &[((f64, f64), &str)],
    offset: (f64, f64),
) -> Result<()>
where
    Y: Ranged<ValueType = f64>,
{
    for &((x, y), label) in annotations {
        let tail = (x + offset.0, y + offset.1);
        chart.draw_series(std::iter::once(PathElement::new(vec![tail, (x, y)], BLUE)))?;
        chart.draw_series(std::iter::once(Text::new(
            label.to_owned(),
            tail,
            LABEL_FONT.into_font().color(&BLUE),
        )))?;
    }
    Ok(())
}

fn line_chart<Y>(
    path: &Path,
    frame: &Frame<'_>,
    y_range: Y,
    curves: &[Curve<'_>],
    annotations: &[((f64, f64), &str)],
) -> Result<()>
where
    Y: AsRangedCoord<Value = f64>,
    Y::CoordDescType: Ranged<ValueType = f64> + ValueFormatter<f64>,
{
    let x_range = frame.x_range.clone().unwrap_or_else(|| {
        extent(curves.iter().flat_map(|curve| curve.points.iter().map(|p| p.0)))
    });
    let x_span = x_range.end - x_range.start;
    let root = svg_root(path, frame.size)?;
    let mut chart = ChartBuilder::on(&root)
        .margin(12)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(x_range, y_range)?;
    chart
        .configure_mesh()
        .x_desc(frame.x_desc)
        .y_desc(frame.y_desc)
        .label_style(LABEL_FONT)
        .draw()?;

    draw_curves(&mut chart, curves)?;
    let rise = {
        let (lo, hi) = curves
            .iter()
            .flat_map(|curve| curve.points.iter().map(|p| p.1))
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
        if frame.log_scale { 0. } else { 0.1 * (hi - lo) }
    };
    draw_annotations(&mut chart, annotations, (0.03 * x_span, rise))?;

    if curves.iter().any(|curve| curve.label.is_some()) {
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
    }
    root.present()?;
    Ok(())
}

/// Draw `curves` on linear axes, or with a logarithmic ordinate if the frame asks for it
pub fn line_plot(
    path: &Path,
    frame: &Frame<'_>,
    curves: &[Curve<'_>],
    annotations: &[((f64, f64), &str)],
) -> Result<()> {
    if frame.log_scale {
        let curves = curves
            .iter()
            .map(|curve| Curve {
                points: curve.points.iter().copied().filter(|p| p.1 > 0.).collect(),
                colour: curve.colour,
                label: curve.label,
            })
            .collect::<Vec<_>>();
        let annotations = annotations
            .iter()
            .filter(|(p, _)| p.1 > 0.)
            .copied()
            .collect::<Vec<_>>();
        let y_range = positive_extent(curves.iter().flat_map(|c| c.points.iter().map(|p| p.1)));
        line_chart(path, frame, y_range.log_scale(), &curves, &annotations)
    } else {
        let y_range = extent(curves.iter().flat_map(|c| c.points.iter().map(|p| p.1)));
        line_chart(path, frame, y_range, curves, annotations)
    }
}

/// Counts against channel or energy, with labelled lines
pub fn spectrum(
    path: &Path,
    frame: &Frame<'_>,
    name: &str,
    points: Vec<(f64, f64)>,
    annotations: &[&Annotation],
) -> Result<()> {
    let marks = annotations
        .iter()
        .filter_map(|annotation| {
            nearest(&points, annotation.energy)
                .map(|y| ((annotation.energy, y), annotation.label.as_str()))
        })
        .collect::<Vec<_>>();
    line_plot(
        path,
        frame,
        &[Curve {
            points,
            colour: BLACK,
            label: Some(name),
        }],
        &marks,
    )
}

fn nearest(points: &[(f64, f64)], x: f64) -> Option<f64> {
    points
        .iter()
        .min_by(|a, b| (a.0 - x).abs().total_cmp(&(b.0 - x).abs()))
        .map(|p| p.1)
}

/// Channel spectrum with the fitted model over the fit window
pub fn peak_fit(
    path: &Path,
    frame: &Frame<'_>,
    name: &str,
    points: Vec<(f64, f64)>,
    parameters: &PeakParameters,
    window: (u32, u32),
) -> Result<()> {
    let model = (window.0..=window.1)
        .map(|channel| {
            let x = f64::from(channel);
            (x, parameters.evaluate(x))
        })
        .collect();
    let data_label = format!("{name} Data");
    let fit_label = format!("{name} Fit");
    line_plot(
        path,
        frame,
        &[
            Curve {
                points,
                colour: BLACK,
                label: Some(&data_label),
            },
            Curve {
                points: model,
                colour: RED,
                label: Some(&fit_label),
            },
        ],
        &[],
    )
}

/// The calibration points with their errors and the fitted line
pub fn calibration(
    path: &Path,
    size: (u32, u32),
    calibration: &EnergyCalibration,
    centre: Measurement<f64>,
    energy: f64,
) -> Result<()> {
    let slope = calibration.slope();
    let points = [(0., 0., 0.), (centre.value, energy, slope.value * centre.uncertainty)];
    let x_max = centre.value * 1.2;

    let root = svg_root(path, size)?;
    let mut chart = ChartBuilder::on(&root)
        .margin(12)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(-0.05 * x_max..x_max, -0.05 * energy * 1.2..energy * 1.2)?;
    chart
        .configure_mesh()
        .x_desc("Channel")
        .y_desc("Energy (keV)")
        .label_style(LABEL_FONT)
        .draw()?;

    chart
        .draw_series(LineSeries::new(
            linspace(0., x_max, 100)
                .into_iter()
                .map(|x| (x, calibration.energy(x))),
            FIT_RED.stroke_width(2),
        ))?
        .label("Linear fit")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], FIT_RED));
    chart.draw_series(
        points
            .iter()
            .map(|&(x, y, e)| PathElement::new(vec![(x, y - e), (x, y + e)], BLACK)),
    )?;
    chart
        .draw_series(
            points
                .iter()
                .map(|&(x, y, _)| Circle::new((x, y), 4, DATA_GREEN.filled())),
        )?
        .label("Data")
        .legend(|(x, y)| Circle::new((x + 10, y), 4, DATA_GREEN.filled()));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

/// Either linearised quantity against energy
pub fn kurie(path: &Path, size: (u32, u32), rows: &[KurieRow], quantity: Quantity) -> Result<()> {
    let y_desc = match quantity {
        Quantity::Kurie => "(1/W) sqrt(N(E) / G(Z,W))",
        Quantity::SqrtCounts => "sqrt(N(E))",
    };
    let frame = Frame {
        size,
        x_desc: "Energy (MeV)",
        y_desc,
        x_range: Some(0.0..1.6),
        log_scale: false,
    };
    let points = rows
        .iter()
        .map(|row| (row.energy, quantity.of(row)))
        .filter(|p| p.1.is_finite())
        .collect();
    line_plot(
        path,
        &frame,
        &[Curve {
            points,
            colour: BLACK,
            label: None,
        }],
        &[],
    )
}

fn quantity_style(quantity: Quantity) -> (RGBColor, &'static str) {
    match quantity {
        Quantity::Kurie => (BLUE, "Kurie Data"),
        Quantity::SqrtCounts => (GREEN, "sqrt(N(E)) Data"),
    }
}

/// Short segments along a polyline, every other one left out
fn dashes(points: &[(f64, f64)], colour: RGBColor) -> Vec<PathElement<(f64, f64)>> {
    points
        .windows(2)
        .step_by(2)
        .map(|pair| PathElement::new(vec![pair[0], pair[1]], colour.stroke_width(2)))
        .collect()
}

/// The Kurie quantity on the left axis and `√N(E)` on the right
///
/// With `fits` the data are restricted to the fitted windows and each line is drawn over its
/// window, then dashed on to its x-intercept, with the zero line marked.
pub fn both_methods(
    path: &Path,
    size: (u32, u32),
    rows: &[KurieRow],
    fits: &[WindowFit],
) -> Result<()> {
    let series = |quantity: Quantity| -> Vec<(f64, f64)> {
        let window = fits.iter().find(|fit| fit.quantity == quantity);
        rows.iter()
            .filter(|row| window.map_or(true, |fit| (fit.min..=fit.max).contains(&row.energy)))
            .map(|row| (row.energy, quantity.of(row)))
            .filter(|p| p.1.is_finite())
            .collect()
    };
    let kurie = series(Quantity::Kurie);
    let sqrt_counts = series(Quantity::SqrtCounts);

    let reach = fits
        .iter()
        .map(|fit| fit.q_value().value)
        .filter(|q| q.is_finite())
        .fold(0.9f64, f64::max);
    let x_range = extent(
        kurie
            .iter()
            .chain(&sqrt_counts)
            .map(|p| p.0)
            .chain(fits.iter().map(|_| reach)),
    );
    let with_zero = |points: &[(f64, f64)]| {
        let zero = if fits.is_empty() { None } else { Some(0.) };
        extent(points.iter().map(|p| p.1).chain(zero))
    };

    let root = svg_root(path, size)?;
    let mut chart = ChartBuilder::on(&root)
        .margin(12)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .right_y_label_area_size(70)
        .build_cartesian_2d(x_range.clone(), with_zero(&kurie))?
        .set_secondary_coord(x_range.clone(), with_zero(&sqrt_counts));
    chart
        .configure_mesh()
        .x_desc("Energy (MeV)")
        .y_desc("(1/W) sqrt(N(E) / G(Z,W))")
        .label_style(LABEL_FONT)
        .draw()?;
    chart
        .configure_secondary_axes()
        .y_desc("sqrt(N(E))")
        .label_style(LABEL_FONT)
        .draw()?;

    let (colour, label) = quantity_style(Quantity::Kurie);
    let kurie_series = if fits.is_empty() {
        chart.draw_series(LineSeries::new(kurie, colour.stroke_width(2)))?
    } else {
        chart.draw_series(kurie.iter().map(|&p| Circle::new(p, 2, colour.filled())))?
    };
    kurie_series
        .label(label)
        .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], colour));

    let (colour, label) = quantity_style(Quantity::SqrtCounts);
    let sqrt_series = if fits.is_empty() {
        chart.draw_secondary_series(LineSeries::new(sqrt_counts, colour.stroke_width(2)))?
    } else {
        chart.draw_secondary_series(
            sqrt_counts
                .iter()
                .map(|&p| Circle::new(p, 2, colour.filled())),
        )?
    };
    sqrt_series
        .label(label)
        .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], colour));

    for fit in fits {
        let (colour, _) = quantity_style(fit.quantity);
        let line = |from: f64, to: f64| {
            linspace(from, to, DASH_SEGMENTS)
                .into_iter()
                .map(|x| (x, fit.fit.evaluate(x)))
                .collect::<Vec<_>>()
        };
        let solid = LineSeries::new(line(fit.min, fit.max), colour.stroke_width(2));
        let dashed = dashes(&line(fit.max, reach), colour);
        match fit.quantity {
            Quantity::Kurie => {
                chart.draw_series(solid)?;
                chart.draw_series(dashed)?;
            }
            Quantity::SqrtCounts => {
                chart.draw_secondary_series(solid)?;
                chart.draw_secondary_series(dashed)?;
            }
        }
    }
    if !fits.is_empty() {
        chart.draw_series(std::iter::once(PathElement::new(
            vec![(x_range.start, 0.), (x_range.end, 0.)],
            RED,
        )))?;
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

/// Momentum-space Kurie function against `Q - T` on logarithmic axes, with a zoomed inset
pub fn momentum_check(
    path: &Path,
    size: (u32, u32),
    points: &[MomentumPoint],
    zoom: (f64, f64),
) -> Result<()> {
    let left = points
        .iter()
        .map(|p| (p.energy, p.left))
        .filter(|p| p.1 > 0.)
        .collect::<Vec<_>>();
    let right = points
        .iter()
        .map(|p| (p.energy, p.right))
        .filter(|p| p.1 > 0.)
        .collect::<Vec<_>>();
    let x_range = extent(points.iter().map(|p| p.energy));
    let left_range = positive_extent(left.iter().map(|p| p.1));
    let right_range = positive_extent(right.iter().map(|p| p.1));

    let root = svg_root(path, size)?;
    let mut chart = ChartBuilder::on(&root)
        .margin(12)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .right_y_label_area_size(70)
        .build_cartesian_2d(x_range.clone(), right_range.clone().log_scale())?
        .set_secondary_coord(x_range, left_range.clone().log_scale());
    chart
        .configure_mesh()
        .x_desc("T (MeV)")
        .y_desc("Q - T (MeV)")
        .label_style(LABEL_FONT)
        .draw()?;
    chart
        .configure_secondary_axes()
        .y_desc("sqrt(N(p) / (p^2 F(Z,T)))")
        .label_style(LABEL_FONT)
        .draw()?;

    chart.draw_series(std::iter::once(Rectangle::new(
        [(zoom.0, right_range.start), (zoom.1, right_range.end)],
        BLACK.mix(0.05).filled(),
    )))?;
    chart
        .draw_series(dashes(&right, BLUE))?
        .label("Q - T")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));
    chart
        .draw_secondary_series(dashes(&left, GREEN))?
        .label("sqrt(N(p) / (p^2 F(Z,T)))")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], GREEN));
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    // Inset in the right half, vertically centred
    let (width, height) = size;
    let inset = root.clone().shrink(
        (width / 2, height * 7 / 20),
        (width * 2 / 5, height * 3 / 10),
    );
    inset.fill(&WHITE)?;
    let in_zoom = |p: &&(f64, f64)| (zoom.0..=zoom.1).contains(&p.0);
    let zoom_right = right.iter().filter(in_zoom).copied().collect::<Vec<_>>();
    let zoom_left = left.iter().filter(in_zoom).copied().collect::<Vec<_>>();
    let zoom_y = positive_extent(zoom_right.iter().chain(&zoom_left).map(|p| p.1));
    let mut zoomed = ChartBuilder::on(&inset)
        .margin(6)
        .x_label_area_size(25)
        .y_label_area_size(45)
        .build_cartesian_2d(zoom.0..zoom.1, zoom_y.log_scale())?;
    zoomed.configure_mesh().draw()?;
    zoomed.draw_series(LineSeries::new(zoom_right, BLUE))?;
    zoomed.draw_series(LineSeries::new(zoom_left, GREEN))?;

    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempdir::TempDir;

    use plotters::prelude::BLACK;

    use super::{extent, line_plot, positive_extent, Curve, Frame};

    #[test]
    fn extents_pad_and_survive_degenerate_data() {
        let range = extent([1., 3., f64::NAN].into_iter());
        approx::assert_relative_eq!(range.start, 0.8);
        approx::assert_relative_eq!(range.end, 3.2);
        assert_eq!(extent(std::iter::empty()), 0.0..1.0);
        assert_eq!(extent([2.].into_iter()), 1.0..3.0);
        assert_eq!(positive_extent([0., -1.].into_iter()), 0.1..10.0);
    }

    #[test]
    fn log_and_linear_figures_are_written() {
        let dir = TempDir::new("plot").unwrap();
        let points = (0..50).map(|k| (f64::from(k), f64::from(k % 7))).collect::<Vec<_>>();
        for log_scale in [false, true] {
            let path = dir.path().join(format!("spectrum_{log_scale}.svg"));
            let frame = Frame {
                size: (400, 300),
                x_desc: "Channel",
                y_desc: "Counts",
                x_range: None,
                log_scale,
            };
            line_plot(
                &path,
                &frame,
                &[Curve {
                    points: points.clone(),
                    colour: BLACK,
                    label: Some("Cesio137"),
                }],
                &[((10., 3.), "line")],
            )
            .unwrap();
            assert!(fs::read_to_string(&path).unwrap().contains("<svg"));
        }
    }
}
