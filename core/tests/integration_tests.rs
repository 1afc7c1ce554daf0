//! End-to-end integration tests for the landmark localization estimators.
//!
//! These tests drive the full pipeline: a simulator generates the ground truth, the
//! drifting odometry, and the noisy range-bearing observations, and an estimator
//! consumes them through the same loop the command line tool uses. They check that
//! the whole system holds together over long runs, not just at the API level.
//!
//! ## Error Bounds
//!
//! The numeric bounds in the assertions are not theoretical guarantees. They are
//! empirical regression checks, set generously above the error levels the reference
//! scenarios produce, so that a change that breaks the estimation math is caught
//! while ordinary numeric variation between platforms is not.
//!
//! ## Test Structure
//!
//! Tests build a scenario configuration and run the simulator against one or both
//! estimators, verifying that:
//! 1. Runs complete and record every step
//! 2. Estimation errors remain within the regression bounds
//! 3. Identical seeds reproduce identical histories
//! 4. The recorded history round-trips through its CSV form

use landnav::kalman::ExtendedKalmanFilter;
use landnav::linalg::{diagonal_covariance_2, diagonal_covariance_3};
use landnav::particle::{ParticleFilter, ParticleFilterConfig, ResamplingAlgorithm};
use landnav::sim::{RunHistory, SimulationConfig, Simulator, run_simulation};
use landnav::wrap_to_pi;

/// Minimum odometry drift for the outperformance comparison (meters, RMS).
/// Below this the raw odometry happens to be good on its own and the comparison
/// says nothing about the filter.
const MIN_DRIFT_FOR_COMPARISON: f64 = 5.0;

/// Build an extended Kalman filter matching a simulator's scenario.
fn build_kalman(simulator: &Simulator) -> ExtendedKalmanFilter {
    let config = simulator.config();
    ExtendedKalmanFilter::new(
        config.initial_pose,
        config.initial_covariance,
        config.assumed_process_noise(),
        config.assumed_measurement_noise(),
        simulator.map().clone(),
    )
    .expect("EKF construction should succeed")
}

/// Build a particle filter matching a simulator's scenario.
fn build_particle(simulator: &Simulator, filter_config: ParticleFilterConfig) -> ParticleFilter {
    let config = simulator.config();
    ParticleFilter::new(
        config.initial_pose,
        filter_config,
        config.assumed_process_noise(),
        config.assumed_measurement_noise(),
        simulator.map().clone(),
        config.seed,
    )
    .expect("particle filter construction should succeed")
}

/// Run a scenario through the EKF and return the history.
fn run_kalman_scenario(config: SimulationConfig) -> RunHistory {
    let mut simulator = Simulator::new(config).expect("simulator construction should succeed");
    let mut filter = build_kalman(&simulator);
    run_simulation(&mut filter, &mut simulator)
}

/// Run a scenario through the particle filter and return the history.
fn run_particle_scenario(config: SimulationConfig, filter_config: ParticleFilterConfig) -> RunHistory {
    let mut simulator = Simulator::new(config).expect("simulator construction should succeed");
    let mut filter = build_particle(&simulator, filter_config);
    run_simulation(&mut filter, &mut simulator)
}

/// RMS translation error of the raw odometry track against the truth.
fn odometry_rms_error(history: &RunHistory) -> f64 {
    let records = history.records();
    let sum: f64 = records
        .iter()
        .map(|record| {
            let dx = record.odom_x - record.true_x;
            let dy = record.odom_y - record.true_y;
            dx * dx + dy * dy
        })
        .sum();
    (sum / records.len() as f64).sqrt()
}

// ==================== Extended Kalman Filter ====================

/// Run the full EKF reference scenario and verify that:
/// 1. Every step is recorded
/// 2. The errors stay within the regression bounds
/// 3. Observations are fused throughout the run
#[test]
fn test_ekf_closed_loop_on_reference_scenario() {
    let config = SimulationConfig::ekf_scenario();
    let n_steps = config.n_steps();
    let history = run_kalman_scenario(config);

    assert_eq!(history.len(), n_steps, "every step should produce a record");

    let summary = history.summary();
    println!("\n=== EKF reference scenario ===");
    println!("{}", summary);

    assert!(
        summary.rms_translation_error < 10.0,
        "EKF RMS translation error should stay bounded, got {:.2} m",
        summary.rms_translation_error
    );
    assert!(
        summary.max_translation_error < 50.0,
        "EKF max translation error should stay bounded, got {:.2} m",
        summary.max_translation_error
    );
    assert!(
        summary.mean_absolute_heading_error < 0.5,
        "EKF mean |heading error| should stay bounded, got {:.3} rad",
        summary.mean_absolute_heading_error
    );

    // Observations arrive every step in this scenario and a healthy filter fuses
    // essentially all of them.
    let fused = history.records().iter().filter(|r| r.observed).count();
    assert!(
        fused as f64 > 0.9 * n_steps as f64,
        "expected most observations to be fused, got {} of {}",
        fused,
        n_steps
    );

    for record in history.records() {
        assert!(record.std_x.is_finite() && record.std_x >= 0.0);
        assert!(record.std_y.is_finite() && record.std_y >= 0.0);
        assert!(record.std_heading.is_finite() && record.std_heading >= 0.0);
        assert!(
            record.neff.is_none(),
            "a covariance-based estimator should not report a sample size"
        );
    }
}

#[test]
fn test_ekf_run_is_reproducible() {
    let scenario = |seed: u64| SimulationConfig {
        duration: 300.0,
        seed,
        ..SimulationConfig::ekf_scenario()
    };

    let first = run_kalman_scenario(scenario(123456));
    let second = run_kalman_scenario(scenario(123456));
    let other = run_kalman_scenario(scenario(7));

    assert_eq!(
        first.records(),
        second.records(),
        "the same seed should reproduce the run bit for bit"
    );
    assert_ne!(
        first.records(),
        other.records(),
        "a different seed should change the run"
    );
}

/// Crank up the odometry noise until dead reckoning drifts badly, then verify the
/// filter does better. The comparison is skipped when the drift happens to stay
/// small, matching how much a single trajectory can prove.
#[test]
fn test_ekf_outperforms_odometry_under_heavy_drift() {
    let one_degree = 1.0_f64.to_radians();
    let config = SimulationConfig {
        duration: 3000.0,
        process_noise_true: diagonal_covariance_3([0.3, 0.3, 3.0 * one_degree]),
        measurement_noise_true: diagonal_covariance_2([1.0, one_degree]),
        ..SimulationConfig::ekf_scenario()
    };
    let history = run_kalman_scenario(config);

    let odometry_rms = odometry_rms_error(&history);
    let filter_rms = history.summary().rms_translation_error;

    println!("\n=== Performance comparison ===");
    println!("Odometry RMS translation error: {:.2} m", odometry_rms);
    println!("EKF RMS translation error: {:.2} m", filter_rms);
    println!(
        "Improvement: {:.1}%",
        (1.0 - filter_rms / odometry_rms) * 100.0
    );

    assert!(
        filter_rms < 5.0,
        "EKF should hold its error near the measurement noise level, got {:.2} m",
        filter_rms
    );
    if odometry_rms > MIN_DRIFT_FOR_COMPARISON {
        assert!(
            filter_rms < odometry_rms,
            "EKF should beat raw odometry. EKF: {:.2} m, odometry: {:.2} m",
            filter_rms,
            odometry_rms
        );
    }
}

/// Verify that an observation outage suspends fusion and that the uncertainty
/// behaves accordingly: the heading variance grows through the outage (prediction
/// adds process noise every step) and shrinks again once observations resume.
#[test]
fn test_ekf_outage_window_suspends_fusion() {
    let config = SimulationConfig {
        duration: 400.0,
        outage: Some((100.0, 200.0)),
        ..SimulationConfig::ekf_scenario()
    };
    let history = run_kalman_scenario(config);
    let records = history.records();

    for record in records {
        if record.time >= 100.0 && record.time <= 200.0 {
            assert!(
                !record.observed,
                "no fusion should happen inside the outage, got one at t = {}",
                record.time
            );
        }
    }
    assert!(
        records.iter().any(|r| r.time < 100.0 && r.observed),
        "observations should be fused before the outage"
    );
    assert!(
        records.iter().any(|r| r.time > 200.0 && r.observed),
        "observations should be fused after the outage"
    );

    // dt = 1, so the records at t = 100, 200, and 400 sit at these indices.
    let outage_start = &records[99];
    let outage_end = &records[199];
    let final_record = &records[399];
    assert!(
        outage_end.std_heading > outage_start.std_heading,
        "heading uncertainty should grow through the outage: {:.4} -> {:.4}",
        outage_start.std_heading,
        outage_end.std_heading
    );
    assert!(
        final_record.std_heading < outage_end.std_heading,
        "heading uncertainty should recover after the outage: {:.4} -> {:.4}",
        outage_end.std_heading,
        final_record.std_heading
    );
}

/// The recorded fields are definitions of each other; verify the relations hold on
/// actual run output.
#[test]
fn test_step_records_are_internally_consistent() {
    let config = SimulationConfig {
        duration: 100.0,
        ..SimulationConfig::ekf_scenario()
    };
    let dt = config.dt;
    let history = run_kalman_scenario(config);

    for (i, record) in history.records().iter().enumerate() {
        assert_eq!(record.time, (i + 1) as f64 * dt);
        assert_eq!(record.error_x, record.est_x - record.true_x);
        assert_eq!(record.error_y, record.est_y - record.true_y);
        assert_eq!(
            record.error_heading,
            wrap_to_pi(record.est_heading - record.true_heading)
        );
        assert!(
            record.error_heading > -std::f64::consts::PI
                && record.error_heading <= std::f64::consts::PI
        );
    }
}

// ==================== Particle Filter ====================

/// Run the full particle filter reference scenario and verify that:
/// 1. Every step is recorded with a valid effective sample size
/// 2. The errors stay within the regression bounds
/// 3. Observations are fused throughout the run
#[test]
fn test_particle_filter_closed_loop_on_reference_scenario() {
    let config = SimulationConfig::particle_scenario();
    let n_steps = config.n_steps();
    let filter_config = ParticleFilterConfig::default();
    let particle_count = filter_config.particle_count as f64;
    let history = run_particle_scenario(config, filter_config);

    assert_eq!(history.len(), n_steps, "every step should produce a record");

    let summary = history.summary();
    println!("\n=== Particle filter reference scenario ===");
    println!("{}", summary);

    assert!(
        summary.rms_translation_error < 5.0,
        "PF RMS translation error should stay bounded, got {:.2} m",
        summary.rms_translation_error
    );
    assert!(
        summary.max_translation_error < 25.0,
        "PF max translation error should stay bounded, got {:.2} m",
        summary.max_translation_error
    );
    assert!(
        summary.mean_absolute_heading_error < 0.5,
        "PF mean |heading error| should stay bounded, got {:.3} rad",
        summary.mean_absolute_heading_error
    );

    let fused = history.records().iter().filter(|r| r.observed).count();
    assert!(
        fused as f64 > 0.9 * n_steps as f64,
        "expected most observations to be fused, got {} of {}",
        fused,
        n_steps
    );

    for record in history.records() {
        let neff = record
            .neff
            .expect("a sample-based estimator should report its sample size");
        assert!(
            neff >= 0.99 && neff <= 1.01 * particle_count,
            "effective sample size should lie between 1 and the particle count, got {:.2}",
            neff
        );
    }
}

#[test]
fn test_particle_filter_run_is_reproducible() {
    let scenario = |seed: u64| SimulationConfig {
        duration: 200.0,
        seed,
        ..SimulationConfig::particle_scenario()
    };

    let first = run_particle_scenario(scenario(123456), ParticleFilterConfig::default());
    let second = run_particle_scenario(scenario(123456), ParticleFilterConfig::default());
    let other = run_particle_scenario(scenario(7), ParticleFilterConfig::default());

    assert_eq!(
        first.records(),
        second.records(),
        "the same seed should reproduce the run bit for bit"
    );
    assert_ne!(
        first.records(),
        other.records(),
        "a different seed should change the run"
    );
}

/// Both resampling algorithms must keep the cloud on track over a full scenario.
#[test]
fn test_particle_filter_tracks_with_both_resampling_algorithms() {
    for algorithm in [
        ResamplingAlgorithm::LowVariance,
        ResamplingAlgorithm::Reallocation,
    ] {
        let config = SimulationConfig {
            duration: 400.0,
            ..SimulationConfig::particle_scenario()
        };
        let filter_config = ParticleFilterConfig {
            resampling: algorithm,
            ..ParticleFilterConfig::default()
        };
        let summary = run_particle_scenario(config, filter_config).summary();
        println!("\n=== {} resampling ===", algorithm);
        println!("{}", summary);
        assert!(
            summary.rms_translation_error < 5.0,
            "{} resampling should keep the RMS error bounded, got {:.2} m",
            algorithm,
            summary.rms_translation_error
        );
    }
}

// ==================== History persistence ====================

/// Histories from both estimators round-trip through CSV, including the empty
/// sample size column the EKF leaves behind.
#[test]
fn test_history_round_trips_through_csv() {
    let directory = tempfile::tempdir().expect("temp dir should be created");

    let kalman_config = SimulationConfig {
        duration: 50.0,
        ..SimulationConfig::ekf_scenario()
    };
    let kalman_history = run_kalman_scenario(kalman_config);
    let kalman_path = directory.path().join("ekf_history.csv");
    kalman_history
        .to_csv(&kalman_path)
        .expect("history should serialize");
    let kalman_loaded = RunHistory::from_csv(&kalman_path).expect("history should deserialize");
    assert_eq!(kalman_history.records(), kalman_loaded.records());

    let particle_config = SimulationConfig {
        duration: 50.0,
        ..SimulationConfig::particle_scenario()
    };
    let particle_history = run_particle_scenario(particle_config, ParticleFilterConfig::default());
    let particle_path = directory.path().join("pf_history.csv");
    particle_history
        .to_csv(&particle_path)
        .expect("history should serialize");
    let particle_loaded = RunHistory::from_csv(&particle_path).expect("history should deserialize");
    assert_eq!(particle_history.records(), particle_loaded.records());
}

// ==================== Estimator comparison ====================

/// Run both estimators on the same scenario and print a comparison. Each filter is
/// held to its own regression bound; neither is required to beat the other on a
/// single trajectory.
#[test]
fn test_filter_comparison() {
    let config = SimulationConfig::particle_scenario();

    let kalman_summary = run_kalman_scenario(config.clone()).summary();
    let particle_summary =
        run_particle_scenario(config, ParticleFilterConfig::default()).summary();

    println!("\n=== Filter comparison (shared scenario) ===");
    println!("EKF: {}", kalman_summary);
    println!("PF:  {}", particle_summary);

    assert!(
        kalman_summary.rms_translation_error < 5.0,
        "EKF RMS translation error should stay bounded, got {:.2} m",
        kalman_summary.rms_translation_error
    );
    assert!(
        particle_summary.rms_translation_error < 5.0,
        "PF RMS translation error should stay bounded, got {:.2} m",
        particle_summary.rms_translation_error
    );
}
