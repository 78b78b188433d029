//! Calibrated coefficients and their optimizer-facing ratios

use serde::Serialize;
use std::fmt::Write as _;

/// Raw coefficients in milliseconds, all measured on one dataset instance
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostCoefficients {
    /// CPU cost of processing one document
    pub time_tuple_ms: f64,
    /// Cost of reading one leaf page sequentially from cold storage
    pub time_seq_page_ms: f64,
    /// Cost of one random-offset data page fetch
    pub time_rand_page_ms: f64,
}

/// Dimensionless ratios, CPU cost normalized to 1
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostFactors {
    pub cpu_factor: f64,
    pub seq_io_factor: f64,
    pub rand_io_factor: f64,
}

impl CostCoefficients {
    pub fn factors(&self) -> CostFactors {
        CostFactors {
            cpu_factor: 1.0,
            seq_io_factor: self.time_seq_page_ms / self.time_tuple_ms,
            rand_io_factor: self.time_rand_page_ms / self.time_tuple_ms,
        }
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    coefficients: &'a CostCoefficients,
    factors: CostFactors,
}

/// Human-readable summary printed at the end of a run
pub fn render_text(coefficients: &CostCoefficients) -> String {
    let f = coefficients.factors();
    let c = coefficients;
    let mut out = String::new();
    let _ = writeln!(out, "=== Cost Coefficient Ratios ===");
    let _ = writeln!(out, "  cpuFactor    = 1.0 ({:.6}ms)", c.time_tuple_ms);
    let _ = writeln!(
        out,
        "  seqIOFactor  = {:.1}  ({:.4}ms / {:.6}ms)",
        f.seq_io_factor, c.time_seq_page_ms, c.time_tuple_ms
    );
    let _ = writeln!(
        out,
        "  randIOFactor = {:.1}  ({:.4}ms / {:.6}ms)",
        f.rand_io_factor, c.time_rand_page_ms, c.time_tuple_ms
    );
    out
}

/// Coefficients and ratios as one JSON object
pub fn render_json(coefficients: &CostCoefficients) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&JsonReport {
        coefficients,
        factors: coefficients.factors(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CostCoefficients {
        CostCoefficients {
            time_tuple_ms: 0.0003,
            time_seq_page_ms: 0.3,
            time_rand_page_ms: 4.0,
        }
    }

    #[test]
    fn test_factors_normalize_to_cpu() {
        let f = sample().factors();
        assert_eq!(f.cpu_factor, 1.0);
        assert!((f.seq_io_factor - 1000.0).abs() < 1e-6);
        assert!((f.rand_io_factor - 13_333.333_333).abs() < 1e-3);
    }

    #[test]
    fn test_render_text() {
        let text = render_text(&sample());
        assert!(text.contains("cpuFactor    = 1.0 (0.000300ms)"));
        assert!(text.contains("seqIOFactor  = 1000.0  (0.3000ms / 0.000300ms)"));
        assert!(text.contains("randIOFactor = 13333.3"));
    }

    #[test]
    fn test_render_json() {
        let json: serde_json::Value = serde_json::from_str(&render_json(&sample()).unwrap()).unwrap();
        assert_eq!(json["coefficients"]["time_seq_page_ms"], 0.3);
        assert!((json["factors"]["seq_io_factor"].as_f64().unwrap() - 1000.0).abs() < 1e-6);
    }
}
