//! Calibration protocol
//!
//! Three phases, always in this order:
//!
//! 1. **CPU**: warm full scans. After a cold restart a few scans pull every
//!    data page into the engine cache; the following scans do no disk I/O.
//!    The cost model charges CPU once per examined and once per returned
//!    document, so a full scan costs `2 * cardinality` units.
//! 2. **Sequential I/O**: one full scan after every cold restart. The CPU
//!    share measured in phase 1 is subtracted from each sample before
//!    reduction, and the result is spread over the collection's leaf pages.
//! 3. **Random I/O**: point lookups on evenly spaced keys. The index stays
//!    warm (one cold restart, one warm-up lookup) and only the OS page cache
//!    is dropped before each lookup, so the fetch stage is the only cold
//!    part. The sample is the fetch time: total minus index traversal.
//!
//! Index height is not yet a cost multiplier for random I/O; a deeper tree
//! would need more page reads per lookup than the single fetch measured here.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tracing::{info, warn};

use crate::client::ExplainResult;
use crate::config::{CalibrationConfig, ProtocolConfig};
use crate::controller::{with_engine, Lifecycle};
use crate::error::{CalibrationError, Result};
use crate::interrupt;
use crate::populate::{DatasetPopulator, DatasetSpec};
use crate::report::CostCoefficients;
use crate::sample::{Phase, SampleSet};

const NANOS_PER_MILLI: f64 = 1e6;

/// Per-document CPU cost in ms from a mean warm full-scan duration
pub fn time_tuple_ms(mean_scan_ns: f64, cardinality: u64) -> f64 {
    mean_scan_ns / (2.0 * cardinality as f64) / NANOS_PER_MILLI
}

/// Expected CPU share of one full scan, in ns
pub fn cpu_overlap_ns(cardinality: u64, time_tuple_ms: f64) -> f64 {
    2.0 * cardinality as f64 * time_tuple_ms * NANOS_PER_MILLI
}

/// Cold-scan sample with the CPU share removed
///
/// Not clamped: a negative value means the CPU estimate exceeds the whole
/// cold scan, and it is left for the trimmed mean to expose.
pub fn corrected_cold_scan_ns(raw_ns: u64, cardinality: u64, time_tuple_ms: f64) -> f64 {
    raw_ns as f64 - cpu_overlap_ns(cardinality, time_tuple_ms)
}

/// Data page fetch time of an indexed point lookup
pub fn fetch_duration_ns(explain: &ExplainResult) -> Result<f64> {
    let index_ns = explain.index_traversal_ns.ok_or_else(|| {
        CalibrationError::MalformedExplain("point lookup has no index traversal stage".into())
    })?;
    if index_ns > explain.total_ns {
        return Err(CalibrationError::MalformedExplain(format!(
            "index traversal {}ns exceeds total {}ns",
            index_ns, explain.total_ns
        )));
    }
    Ok((explain.total_ns - index_ns) as f64)
}

/// Pick `num_lookups + 1` distinct keys from an evenly spaced grid over `1..=cardinality`
///
/// The grid stride is `cardinality / (num_lookups + 1)`, far enough apart that
/// two picked keys practically never share a data page. The first key is the
/// warm-up lookup.
pub fn spaced_keys<R: Rng + ?Sized>(
    cardinality: u64,
    num_lookups: usize,
    rng: &mut R,
) -> Result<Vec<u64>> {
    let needed = num_lookups as u64 + 1;
    let stride = cardinality / needed;
    if stride == 0 {
        return Err(CalibrationError::Precondition(format!(
            "Not enough evenly-spaced keys: need {}, have {}",
            needed, cardinality
        )));
    }

    let population: Vec<u64> = (1..=cardinality).step_by(stride as usize).collect();
    if (population.len() as u64) < needed {
        return Err(CalibrationError::Precondition(format!(
            "Not enough evenly-spaced keys: need {}, have {}",
            needed,
            population.len()
        )));
    }

    let mut keys: Vec<u64> = population
        .choose_multiple(&mut *rng, needed as usize)
        .copied()
        .collect();
    keys.shuffle(rng);
    Ok(keys)
}

fn log_summary(samples: &SampleSet, trimmed_ns: f64) {
    let Some(s) = samples.summary() else {
        return;
    };
    let ms = |ns: f32| ns as f64 / NANOS_PER_MILLI;
    info!(
        phase = %samples.phase(),
        trials = samples.len(),
        "trimmed mean {:.3}ms (min {:.3}ms, median {:.3}ms, p90 {:.3}ms, max {:.3}ms, stddev {:.3}ms)",
        trimmed_ns / NANOS_PER_MILLI,
        ms(s.min),
        ms(s.median),
        ms(s.p90),
        ms(s.max),
        ms(s.stddev),
    );
}

/// Phase A: per-document CPU cost in ms
pub fn calibrate_cpu<L: Lifecycle + ?Sized>(lc: &mut L, config: &ProtocolConfig) -> Result<f64> {
    let collection = &config.scan_collection;
    info!(
        "=== CPU Calibration ({} warm scans on {}) ===",
        config.cpu_runs, collection
    );

    lc.restart_cold()?;
    let db = lc.database()?;
    for _ in 0..config.cpu_warmup_scans {
        interrupt::check()?;
        db.explain(collection, None)?;
    }
    info!("Engine cache warmed ({} full scans)", config.cpu_warmup_scans);

    let mut samples = SampleSet::new(Phase::Cpu);
    for i in 0..config.cpu_runs {
        interrupt::check()?;
        let t = db.explain(collection, None)?.total_ns;
        samples.record(t as f64);
        info!(
            "[{}/{}] warm scan: {:.3}ms",
            i + 1,
            config.cpu_runs,
            t as f64 / NANOS_PER_MILLI
        );
    }

    let mean_ns = samples.trimmed_mean_ns(config.trim_proportion)?;
    log_summary(&samples, mean_ns);
    let time_tuple = time_tuple_ms(mean_ns, config.cardinality);
    info!(
        "time_tuple: {:.1}ns ({:.6}ms)",
        time_tuple * NANOS_PER_MILLI,
        time_tuple
    );
    // Every ratio divides by this
    if !(time_tuple > 0.0 && time_tuple.is_finite()) {
        return Err(CalibrationError::ImplausibleMeasurement(format!(
            "warm scans of {} averaged {:.0}ns, giving a per-document CPU cost of {}ms",
            collection, mean_ns, time_tuple
        )));
    }
    Ok(time_tuple)
}

/// Phase B: sequential cost of one leaf page in ms
pub fn calibrate_sequential_io<L: Lifecycle + ?Sized>(
    lc: &mut L,
    config: &ProtocolConfig,
    time_tuple_ms: f64,
) -> Result<f64> {
    let collection = &config.scan_collection;
    info!(
        "=== Sequential I/O ({} cold scans on {}) ===",
        config.seq_runs, collection
    );
    let overlap_ns = cpu_overlap_ns(config.cardinality, time_tuple_ms);

    let mut samples = SampleSet::new(Phase::SequentialIo);
    for i in 0..config.seq_runs {
        interrupt::check()?;
        lc.restart_cold()?;
        let t = lc.database()?.explain(collection, None)?.total_ns;
        let corrected = corrected_cold_scan_ns(t, config.cardinality, time_tuple_ms);
        samples.record(corrected);
        info!(
            "[{}/{}] cold scan: {:.3}ms",
            i + 1,
            config.seq_runs,
            t as f64 / NANOS_PER_MILLI
        );
        if corrected < 0.0 {
            warn!(
                "cold scan {:.3}ms is faster than its CPU share {:.3}ms; keeping negative sample",
                t as f64 / NANOS_PER_MILLI,
                overlap_ns / NANOS_PER_MILLI
            );
        }
    }

    let mean_ns = samples.trimmed_mean_ns(config.trim_proportion)?;
    log_summary(&samples, mean_ns);
    if samples.negative_count() > 0 {
        warn!(
            negative = samples.negative_count(),
            trials = samples.len(),
            "sequential samples went negative after CPU correction; check the CPU calibration"
        );
    }

    let leaf_pages = lc.database()?.leaf_page_count(collection)?;
    if leaf_pages == 0 {
        return Err(CalibrationError::Precondition(format!(
            "{} reports no leaf pages",
            collection
        )));
    }
    let mean_ms = mean_ns / NANOS_PER_MILLI;
    let per_page_ms = mean_ms / leaf_pages as f64;

    info!("Mean cold scan: {:.3}ms", mean_ms);
    info!("Leaf pages: {}", leaf_pages);
    info!("Mean per leaf page: {:.5}ms", per_page_ms);
    Ok(per_page_ms)
}

/// Phase C: cost of one random data page fetch in ms
///
/// `keys[0]` is the warm-up lookup; each remaining key is one trial.
pub fn calibrate_random_io<L: Lifecycle + ?Sized>(
    lc: &mut L,
    config: &ProtocolConfig,
    keys: &[u64],
) -> Result<f64> {
    let Some((warmup, trial_keys)) = keys.split_first() else {
        return Err(CalibrationError::Precondition(
            "random I/O phase needs at least one key".into(),
        ));
    };
    let collection = &config.lookup_collection;
    let field = config.lookup_field.as_str();
    info!(
        "=== Random I/O ({} cold lookups on {}) ===",
        trial_keys.len(),
        collection
    );

    lc.restart_cold()?;
    let db = lc.database()?;
    db.explain(collection, Some(&json!({ field: warmup })))?;
    info!("Warmup done (index structure cached by the engine)");

    let mut samples = SampleSet::new(Phase::RandomIo);
    for (i, key) in trial_keys.iter().enumerate() {
        interrupt::check()?;
        // OS cache only: the engine keeps the index warm
        lc.flush_os_cache()?;

        let explain = db.explain(collection, Some(&json!({ field: key })))?;
        let fetch_ns = fetch_duration_ns(&explain)?;
        samples.record(fetch_ns);
        info!(
            "[{}/{}] {}={}  total={:.3}ms  ix={:.3}ms  fetch={:.3}ms",
            i + 1,
            trial_keys.len(),
            field,
            key,
            explain.total_ns as f64 / NANOS_PER_MILLI,
            explain.index_traversal_ns.unwrap_or(0) as f64 / NANOS_PER_MILLI,
            fetch_ns / NANOS_PER_MILLI
        );
    }

    let mean_ns = samples.trimmed_mean_ns(config.trim_proportion)?;
    log_summary(&samples, mean_ns);
    let fetch_ms = mean_ns / NANOS_PER_MILLI;
    info!("FETCH mean: {:.3}ms", fetch_ms);
    Ok(fetch_ms)
}

/// Run all three phases against a freshly started engine
///
/// Configuration and key-sampling preconditions are checked before the engine
/// is touched. The engine is stopped on every exit path.
pub fn run_calibration<L: Lifecycle + ?Sized>(
    lc: &mut L,
    populator: &dyn DatasetPopulator,
    config: &CalibrationConfig,
) -> Result<CostCoefficients> {
    config.validate()?;
    let protocol = &config.protocol;

    let mut rng = match protocol.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let keys = spaced_keys(protocol.cardinality, protocol.random_lookups, &mut rng)?;
    let dataset = DatasetSpec::from_config(protocol);

    with_engine(lc, |lc| {
        if config.skip_populate {
            info!("Reusing existing dataset");
        } else {
            populator.populate(&lc.database()?, &dataset)?;
        }

        let time_tuple_ms = calibrate_cpu(lc, protocol)?;
        let time_seq_page_ms = calibrate_sequential_io(lc, protocol, time_tuple_ms)?;
        let time_rand_page_ms = calibrate_random_io(lc, protocol, &keys)?;

        Ok(CostCoefficients {
            time_tuple_ms,
            time_seq_page_ms,
            time_rand_page_ms,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_time_tuple_divides_by_twice_cardinality() {
        let t = time_tuple_ms(600_000_000.0, 1_000_000);
        assert!((t - 600_000_000.0 / 1e6 / 2_000_000.0).abs() < 1e-15);
        assert!((t - 0.0003).abs() < 1e-15);
    }

    #[test]
    fn test_corrected_cold_scan() {
        let corrected = corrected_cold_scan_ns(900_000_000, 1_000_000, 0.0003);
        assert!((corrected - 300_000_000.0).abs() < 1e-3);
    }

    #[test]
    fn test_corrected_cold_scan_is_not_clamped() {
        let corrected = corrected_cold_scan_ns(500_000_000, 1_000_000, 0.0003);
        assert!((corrected + 100_000_000.0).abs() < 1e-3);
    }

    #[test]
    fn test_fetch_duration_subtracts_index_traversal() {
        let explain = ExplainResult {
            total_ns: 5_000_000,
            index_traversal_ns: Some(1_250_000),
        };
        assert_eq!(fetch_duration_ns(&explain).unwrap(), 3_750_000.0);
    }

    #[test]
    fn test_fetch_duration_equal_stages_is_zero() {
        let explain = ExplainResult {
            total_ns: 7,
            index_traversal_ns: Some(7),
        };
        assert_eq!(fetch_duration_ns(&explain).unwrap(), 0.0);
    }

    #[test]
    fn test_fetch_duration_requires_index_stage() {
        let explain = ExplainResult {
            total_ns: 5,
            index_traversal_ns: None,
        };
        assert!(matches!(
            fetch_duration_ns(&explain),
            Err(CalibrationError::MalformedExplain(_))
        ));
    }

    #[test]
    fn test_fetch_duration_rejects_inverted_stages() {
        let explain = ExplainResult {
            total_ns: 5,
            index_traversal_ns: Some(6),
        };
        assert!(fetch_duration_ns(&explain).is_err());
    }

    #[test]
    fn test_spaced_keys_lie_on_grid() {
        let mut rng = StdRng::seed_from_u64(42);
        let keys = spaced_keys(1_000_000, 100, &mut rng).unwrap();
        let stride = 1_000_000 / 101;
        assert_eq!(keys.len(), 101);
        assert!(keys.iter().all(|k| (k - 1) % stride == 0 && *k <= 1_000_000));
        let distinct: HashSet<_> = keys.iter().collect();
        assert_eq!(distinct.len(), keys.len());
    }

    #[test]
    fn test_spaced_keys_exact_fit() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut keys = spaced_keys(10, 9, &mut rng).unwrap();
        keys.sort_unstable();
        assert_eq!(keys, (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn test_spaced_keys_too_many_lookups() {
        let mut rng = StdRng::seed_from_u64(1);
        let err = spaced_keys(10, 10, &mut rng).unwrap_err();
        assert!(matches!(err, CalibrationError::Precondition(_)));
        assert!(err.to_string().contains("need 11"));
    }

    #[test]
    fn test_spaced_keys_seed_is_reproducible() {
        let a = spaced_keys(50_000, 20, &mut StdRng::seed_from_u64(9)).unwrap();
        let b = spaced_keys(50_000, 20, &mut StdRng::seed_from_u64(9)).unwrap();
        assert_eq!(a, b);
    }
}
