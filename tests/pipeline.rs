use std::fs;
use std::path::Path;

use tempdir::TempDir;

use kurie_lab::calibration::EnergyCalibration;
use kurie_lab::config::{Config, FermiTable};
use kurie_lab::peak::PeakFit;
use kurie_lab::pipeline::{self, Stage};
use kurie_lab::qvalue::{self, Quantity, WindowGrid};
use kurie_lab::spline::Extrapolation;
use kurie_lab::{kurie, Result};

const NUM_CHANNELS: u32 = 400;
const BACKGROUND_COUNTS: f64 = 20.;
const LINE_ENERGY: f64 = 630.;
const LINE_CENTRE: f64 = 210.3;
const LINE_WIDTH: f64 = 5.;
const LINE_HEIGHT: f64 = 3000.;
/// Endpoint of the synthetic beta spectrum in MeV
const ENDPOINT: f64 = 0.764;
const REST_ENERGY: f64 = 511.;

fn write_histogram(path: &Path, counts: impl Fn(u32) -> f64) -> Result<()> {
    let mut text = String::from("Channel\tCounts\n");
    for channel in 0..NUM_CHANNELS {
        text.push_str(&format!("{channel}\t{}\n", counts(channel)));
    }
    fs::write(path, text)?;
    Ok(())
}

fn fermi(momentum: f64) -> f64 {
    0.1f64.mul_add(momentum, 1.)
}

/// Beta counts whose Kurie function is exactly `100 (Q - T)` on the true energy scale
fn beta_counts(channel: u32) -> f64 {
    let kinetic = f64::from(channel) * LINE_ENERGY / LINE_CENTRE;
    let total = kinetic / REST_ENERGY + 1.;
    let momentum = total.mul_add(total, -1.).sqrt();
    let kurie = 100. * (ENDPOINT - kinetic / 1000.).max(0.);
    fermi(momentum) * total.powi(2) * kurie.powi(2)
}

fn write_inputs(data_dir: &Path) -> Result<()> {
    fs::create_dir_all(data_dir)?;
    write_histogram(&data_dir.join("Datos_Fondo_(canales).txt"), |_| BACKGROUND_COUNTS)?;
    write_histogram(&data_dir.join("Datos_Cesio137_(canales).txt"), |channel| {
        let offset = (f64::from(channel) - LINE_CENTRE) / LINE_WIDTH;
        BACKGROUND_COUNTS + (LINE_HEIGHT * (-0.5 * offset * offset).exp()).round()
    })?;
    write_histogram(&data_dir.join("Datos_Talio204_(canales).txt"), |channel| {
        BACKGROUND_COUNTS + beta_counts(channel)
    })?;

    let mut table = String::from("p\tG(Z,W)\n");
    for step in 0..=24 {
        let momentum = f64::from(step) * 0.25;
        table.push_str(&format!("{momentum}\t{}\n", fermi(momentum)));
    }
    fs::write(data_dir.join("ValoresInterpolacion.txt"), table)?;

    let mut table = String::from("Fermi function of 204Tl\nT (MeV)\tF(Z,T)\n");
    for step in 0..=30 {
        let kinetic = f64::from(step) * 0.05;
        table.push_str(&format!("{kinetic}\t{}\n", 2. - kinetic));
    }
    fs::write(data_dir.join("Fermi_204Tl.txt"), table)?;
    Ok(())
}

/// Write the configuration for a working directory to disk and load it back
fn configure(working_dir: &TempDir) -> Result<Config> {
    let mut config = Config::default();
    config.paths.data_dir = working_dir.path().join("Data");
    config.paths.results_dir = working_dir.path().join("Results");
    config.paths.isotopes = vec!["Cesio137".into(), "Talio204".into()];
    config.peak.initial.offset = 0.;
    config.peak.initial.slope = 0.;
    config.peak.initial.amplitude = 2800.;
    config.peak.initial.centre = 209.;
    config.peak.initial.width = 5.5;
    config.kurie.kinetic_fermi = Some(FermiTable {
        path: "Fermi_204Tl.txt".into(),
        header_lines: 2,
        extrapolation: Extrapolation::Constant,
    });
    // Windows stay below the endpoint so every Kurie fit sees a straight line
    config.qvalue.target = ENDPOINT;
    config.qvalue.kurie = WindowGrid {
        min_range: (0.1, 0.3),
        max_range: (0.4, 0.7),
        step: 0.05,
    };

    let path = working_dir.path().join("kurie-lab.toml");
    fs::write(&path, toml::to_string(&config)?)?;
    Config::load(&path)
}

#[test]
fn full_pipeline_recovers_the_calibration_and_the_endpoint() -> Result<()> {
    let working_dir = TempDir::new("pipeline").unwrap();
    let config = configure(&working_dir)?;
    write_inputs(&config.paths.data_dir)?;

    pipeline::run_all(&config)?;
    let paths = &config.paths;

    let (centre, energy) = PeakFit::centre_from_report(&paths.peak_report("Cesio137"))?;
    approx::assert_abs_diff_eq!(centre.value, LINE_CENTRE, epsilon = 0.05);
    approx::assert_relative_eq!(energy, LINE_ENERGY);

    let calibration = EnergyCalibration::from_report(&paths.slope_report())?;
    approx::assert_relative_eq!(
        calibration.slope().value,
        LINE_ENERGY / LINE_CENTRE,
        max_relative = 1e-3
    );

    for report in [
        paths.rate_report("Cesio137"),
        paths.efficiency_report("Cesio137"),
        paths.intensity_table("Talio204"),
        paths.energy_spectrum("Talio204"),
        paths.window_candidates(),
    ] {
        assert!(report.exists(), "{} was not written", report.display());
    }

    let rows = kurie::read_table(&paths.kurie_table())?;
    assert_eq!(rows.len(), NUM_CHANNELS as usize);
    assert!(rows.iter().all(kurie::KurieRow::is_finite));

    let best = qvalue::read_best(&paths.best_windows())?;
    assert_eq!(best.len(), 2);
    let kurie_window = best
        .iter()
        .find(|window| window.quantity == Quantity::Kurie)
        .unwrap();
    approx::assert_abs_diff_eq!(kurie_window.q_value, ENDPOINT, epsilon = 0.01);

    let values = qvalue::read_q_values(&paths.q_values())?;
    let kurie_value = values
        .iter()
        .find(|value| value.quantity == Quantity::Kurie)
        .unwrap();
    approx::assert_abs_diff_eq!(kurie_value.q_value.value, ENDPOINT, epsilon = 0.01);

    for figure in [
        "Background_ChannelSpectre.svg",
        "Cesio137_ChannelSpectre.svg",
        "Cesio137_EnergySpectre.svg",
        "Cesio137_Fit.svg",
        "energy_calibration.svg",
        "Kurie_Energy.svg",
        "SqrtN(E)_Energy.svg",
        "BothKurieN(E)Plot.svg",
        "LinearFits_QValue.svg",
        "QCuriePlot.svg",
    ] {
        assert!(paths.plot(figure).exists(), "{figure} was not drawn");
    }

    Ok(())
}

#[test]
fn stages_fail_when_their_inputs_are_missing() -> Result<()> {
    let working_dir = TempDir::new("pipeline").unwrap();
    let config = configure(&working_dir)?;

    assert!(Stage::Annotate.run(&config).is_err());
    assert!(Stage::Calibrate.run(&config).is_err());
    assert!(Stage::QFit.run(&config).is_err());
    // Drawing skips every figure whose inputs are absent
    assert!(Stage::Plot.run(&config).is_ok());
    Ok(())
}

#[test]
fn a_failed_peak_fit_only_skips_the_isotope() -> Result<()> {
    let working_dir = TempDir::new("pipeline").unwrap();
    let mut config = configure(&working_dir)?;
    write_inputs(&config.paths.data_dir)?;
    // A window holding fewer points than the model has parameters
    config.peak.window = (208, 210);

    Stage::Annotate.run(&config)?;
    Stage::Fit.run(&config)?;
    assert!(!config.paths.peak_report("Cesio137").exists());
    assert!(Stage::Calibrate.run(&config).is_err());
    Ok(())
}
