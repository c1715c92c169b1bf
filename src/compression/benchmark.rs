//! Algorithm Benchmarking
//!
//! Times every available codec over a corpus of representative payloads and
//! folds a composite score into the selector's per-algorithm weights:
//!
//! ```text
//! score = 0.5 * min(ratio / 10, 1)
//!       + 0.3 * max(0, 1 - (compress_ms + decompress_ms) / 1000)
//!       + 0.2 * max(0, 1 - memory_delta / (2 * size))
//! ```
//!
//! `memory_delta` is the extra buffer space a codec holds on top of the
//! input: the compressed output it had to allocate.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::algorithm::CompressionAlgorithm;
use super::pipeline::CompressionPipeline;

/// Composite benchmark score in 0..=1
pub fn composite_score(
    ratio: f64,
    compress_ms: f64,
    decompress_ms: f64,
    memory_delta: usize,
    size: usize,
) -> f64 {
    let ratio_score = (ratio / 10.0).min(1.0);
    let speed_score = (1.0 - (compress_ms + decompress_ms) / 1000.0).max(0.0);
    let memory_score = if size == 0 {
        0.0
    } else {
        (1.0 - memory_delta as f64 / (2.0 * size as f64)).max(0.0)
    };
    0.5 * ratio_score + 0.3 * speed_score + 0.2 * memory_score
}

/// Aggregated benchmark figures for one algorithm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmBenchmark {
    pub algorithm: CompressionAlgorithm,
    pub samples: usize,
    pub avg_ratio: f64,
    pub avg_compress_ms: f64,
    pub avg_decompress_ms: f64,
    pub avg_score: f64,
    /// Selector weight after this run
    pub weight: f64,
    /// Samples whose roundtrip failed
    pub failures: usize,
}

/// Result of a benchmark run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub results: Vec<AlgorithmBenchmark>,
    pub best: Option<CompressionAlgorithm>,
}

impl CompressionPipeline {
    /// Benchmark every available codec against `samples`.
    ///
    /// Each successful sample updates the algorithm's moving-average weight,
    /// biasing later adaptive selections.
    pub fn benchmark<S: AsRef<[u8]>>(&self, samples: &[S]) -> BenchmarkReport {
        let mut results = Vec::new();

        for algorithm in self.available_algorithms() {
            let Some(codec) = self.codecs().get(algorithm) else {
                continue;
            };

            let mut count = 0usize;
            let mut failures = 0usize;
            let (mut ratio_sum, mut compress_sum, mut decompress_sum, mut score_sum) =
                (0.0, 0.0, 0.0, 0.0);

            for sample in samples.iter().map(AsRef::as_ref) {
                if sample.is_empty() {
                    continue;
                }

                let start = Instant::now();
                let compressed = match codec.compress(sample) {
                    Ok(c) => c,
                    Err(e) => {
                        warn!("Benchmark compress with {} failed: {}", algorithm, e);
                        failures += 1;
                        continue;
                    }
                };
                let compress_ms = start.elapsed().as_secs_f64() * 1000.0;

                let start = Instant::now();
                let roundtrip_ok = matches!(codec.decompress(&compressed), Ok(d) if d == sample);
                let decompress_ms = start.elapsed().as_secs_f64() * 1000.0;
                if !roundtrip_ok {
                    warn!("Benchmark roundtrip with {} failed", algorithm);
                    failures += 1;
                    continue;
                }

                let ratio = sample.len() as f64 / compressed.len().max(1) as f64;
                let score = composite_score(
                    ratio,
                    compress_ms,
                    decompress_ms,
                    compressed.len(),
                    sample.len(),
                );
                self.selector().update_weight(algorithm, score);

                count += 1;
                ratio_sum += ratio;
                compress_sum += compress_ms;
                decompress_sum += decompress_ms;
                score_sum += score;
            }

            let avg = |sum: f64| if count == 0 { 0.0 } else { sum / count as f64 };
            results.push(AlgorithmBenchmark {
                algorithm,
                samples: count,
                avg_ratio: avg(ratio_sum),
                avg_compress_ms: avg(compress_sum),
                avg_decompress_ms: avg(decompress_sum),
                avg_score: avg(score_sum),
                weight: self.selector().weight(algorithm),
                failures,
            });
        }

        let best = results
            .iter()
            .filter(|r| r.samples > 0)
            .max_by(|a, b| a.avg_score.total_cmp(&b.avg_score))
            .map(|r| r.algorithm);

        info!(
            samples = samples.len(),
            best = ?best,
            "Compression benchmark complete"
        );

        BenchmarkReport { results, best }
    }
}
