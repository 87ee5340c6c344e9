//! The matrix product benchmark
//!
//! Builds `D = (A · B) · C` for random `A (rows × inner)`, `B (inner × rows)` and
//! `C (rows × 1)`. `A` starts as a flat array and is reshaped and rechunked
//! before the product. All graphs are built before any chunk is computed, so
//! every shape error surfaces before work starts.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use lazydot_core::{ChunkSize, Chunking, EmpiricalDistribution, Shape, DEFAULT_AUTO_CHUNK_BYTES};
use lazydot_exec::{
    ChunkedArray, ExecConfig, ExecutionStats, Executor, GraphBuilder, ProfileSummary,
    ProgressConfig, ProgressReporter, ResourceSampler, ResourceSeries, TaskGraph, TaskProfiler,
};

use crate::artifacts::{write_artifacts, ArtifactPaths};

/// Benchmark parameters
///
/// Defaults reproduce the full-size run: `A` is a flat array of `1e9` values in
/// chunks of `1e7`, reshaped to `(1e6, 1e3)` and rechunked to `(1e4, auto)`;
/// `B` is `(1e3, 1e6)` in chunks of `(auto, 1e4)`; `C` is `(1e6, 1)` in chunks of
/// `(1e4, auto)`.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkConfig {
    /// Rows of `A`, columns of `B` and rows of `C`
    pub rows: usize,
    /// Contracted dimension of `A · B`
    pub inner: usize,
    /// Chunk length of the flat `A`
    pub flat_chunk: usize,
    /// Chunk extent along the `rows` axis of every operand
    pub block: usize,
    /// Leading values of the flat `A` summarized by the ECDF
    pub ecdf_prefix: usize,
    /// Resource sampling interval
    pub sample_interval: Duration,
    pub seed: u64,
    /// Element budget of `auto` chunk sizes, in bytes
    pub auto_chunk_bytes: usize,
    pub exec: ExecConfig,
    pub progress: ProgressConfig,
    /// Directory receiving the artifacts
    pub out_dir: PathBuf,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            rows: 1_000_000,
            inner: 1_000,
            flat_chunk: 10_000_000,
            block: 10_000,
            ecdf_prefix: 1_000,
            sample_interval: Duration::from_secs(300),
            seed: 0,
            auto_chunk_bytes: DEFAULT_AUTO_CHUNK_BYTES,
            exec: ExecConfig::default(),
            progress: ProgressConfig::default(),
            out_dir: PathBuf::from("."),
        }
    }
}

impl BenchmarkConfig {
    /// Create the full-size configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Divide every dimension and chunk size by `factor`, keeping each at least 1
    ///
    /// The ECDF prefix is kept; it is clipped to the length of `A` when built.
    pub fn scaled(mut self, factor: usize) -> Self {
        let factor = factor.max(1);
        let shrink = |v: usize| (v / factor).max(1);
        self.rows = shrink(self.rows);
        self.inner = shrink(self.inner);
        self.flat_chunk = shrink(self.flat_chunk);
        self.block = shrink(self.block);
        self
    }

    /// Set the sampling interval
    pub fn sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    /// Set the output directory
    pub fn out_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.out_dir = dir.into();
        self
    }

    /// Set the generator seed
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Length of the flat `A`
    pub fn flat_len(&self) -> usize {
        self.rows * self.inner
    }

    /// Default configuration with environment overrides
    ///
    /// - `LAZYDOT_SCALE`: divides every dimension and chunk size
    /// - `LAZYDOT_SAMPLER_INTERVAL_SECS`: sampling interval, fractional seconds allowed
    /// - `LAZYDOT_THREADS`: worker threads, `0` for all cores
    /// - `LAZYDOT_OUT_DIR`: artifact directory
    /// - `LAZYDOT_SEED`: generator seed
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(scale) = env_parse::<usize>("LAZYDOT_SCALE")? {
            if scale == 0 {
                bail!("LAZYDOT_SCALE must be at least 1");
            }
            config = config.scaled(scale);
        }
        if let Some(secs) = env_parse::<f64>("LAZYDOT_SAMPLER_INTERVAL_SECS")? {
            let interval = Duration::try_from_secs_f64(secs)
                .with_context(|| format!("invalid LAZYDOT_SAMPLER_INTERVAL_SECS {}", secs))?;
            if interval.is_zero() {
                bail!("LAZYDOT_SAMPLER_INTERVAL_SECS must be positive");
            }
            config.sample_interval = interval;
        }
        if let Some(threads) = env_parse::<usize>("LAZYDOT_THREADS")? {
            config.exec = config.exec.num_workers(threads);
        }
        if let Ok(dir) = std::env::var("LAZYDOT_OUT_DIR") {
            config.out_dir = PathBuf::from(dir);
        }
        if let Some(seed) = env_parse::<u64>("LAZYDOT_SEED")? {
            config.seed = seed;
        }

        Ok(config)
    }
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid {} value {:?}", name, raw)),
        Err(_) => Ok(None),
    }
}

/// Every array of the benchmark, recorded in one graph
#[derive(Debug, Clone)]
pub struct BenchmarkGraphs {
    pub graph: TaskGraph,
    /// Leading values of the flat `A`
    pub sample: ChunkedArray,
    /// `A` after reshape and rechunk
    pub a: ChunkedArray,
    pub b: ChunkedArray,
    pub c: ChunkedArray,
    /// `(A · B) · C`
    pub product: ChunkedArray,
}

/// Record all benchmark arrays without computing anything
pub fn build_graphs(config: &BenchmarkConfig) -> Result<BenchmarkGraphs> {
    let mut builder = GraphBuilder::new(config.seed).with_auto_chunk_bytes(config.auto_chunk_bytes);

    let flat_shape = Shape::new(vec![config.flat_len()])?;
    let flat = builder.random("A", Chunking::regular(&flat_shape, &[config.flat_chunk])?);
    let b = builder
        .random_with_sizes(
            "B",
            Shape::new(vec![config.inner, config.rows])?,
            &[ChunkSize::Auto, ChunkSize::Fixed(config.block)],
        )
        .context("chunking B")?;
    let c = builder
        .random_with_sizes(
            "C",
            Shape::new(vec![config.rows, 1])?,
            &[ChunkSize::Fixed(config.block), ChunkSize::Auto],
        )
        .context("chunking C")?;

    let sample = builder
        .prefix(&flat, config.ecdf_prefix.min(config.flat_len()))
        .context("selecting the ECDF sample")?;

    let a = builder
        .reshape(
            &flat,
            Shape::new(vec![config.rows, config.inner])?,
            &[ChunkSize::Auto, ChunkSize::Auto],
        )
        .context("reshaping A")?;
    let a = builder
        .rechunk(&a, &[ChunkSize::Fixed(config.block), ChunkSize::Auto])
        .context("rechunking A")?;

    let ab = builder.matmul(&a, &b).context("building A · B")?;
    let product = builder.matmul(&ab, &c).context("building (A · B) · C")?;

    let graph = builder.into_graph();
    tracing::info!(
        tasks = graph.len(),
        estimated_bytes = graph.total_memory(),
        estimated_flops = graph.total_compute_cost(),
        max_fan_in = graph.max_fan_in(),
        a_chunks = a.num_chunks(),
        b_chunks = b.num_chunks(),
        c_chunks = c.num_chunks(),
        product_chunks = product.num_chunks(),
        "benchmark graphs built"
    );

    Ok(BenchmarkGraphs {
        graph,
        sample,
        a,
        b,
        c,
        product,
    })
}

/// Results of a completed run
#[derive(Debug, Clone)]
pub struct BenchmarkReport {
    pub ecdf: EmpiricalDistribution,
    pub resources: ResourceSeries,
    pub stats: ExecutionStats,
    pub profile: ProfileSummary,
    /// Shape of `D`
    pub product_shape: Vec<usize>,
    /// Sum of all values of `D`
    pub product_sum: f64,
    pub artifacts: ArtifactPaths,
}

/// Run the benchmark end to end and write its artifacts
///
/// The ECDF sample is computed first; the product runs afterwards with the
/// resource sampler and progress bar attached. Artifacts are written only when
/// both steps succeed.
pub fn run_benchmark(config: &BenchmarkConfig) -> Result<BenchmarkReport> {
    let graphs = build_graphs(config).context("building task graphs")?;
    let executor = Executor::new(config.exec.clone());

    let sample_output = executor
        .execute(&graphs.graph, graphs.sample.tasks())
        .context("computing the ECDF sample")?;
    let sample: Vec<f64> = graphs.sample.assemble(&sample_output)?.iter().copied().collect();
    drop(sample_output);
    let ecdf = EmpiricalDistribution::new(&sample).context("summarizing the ECDF sample")?;
    tracing::info!(
        values = ecdf.sample_len(),
        steps = ecdf.len(),
        "ECDF sample summarized"
    );

    let profiler = TaskProfiler::new();
    let progress = ProgressReporter::stderr(config.progress.clone());
    let sampler =
        ResourceSampler::start(config.sample_interval).context("starting the resource sampler")?;

    let result = executor.execute_observed(
        &graphs.graph,
        graphs.product.tasks(),
        &[&progress, &profiler],
    );
    let resources = sampler.stop();
    let output = result.context("computing (A · B) · C")?;

    let product = graphs.product.assemble(&output)?;
    let product_sum = product.sum();

    let artifacts = write_artifacts(&config.out_dir, &ecdf, &resources)?;
    tracing::info!(
        tasks = output.stats.tasks_completed,
        elapsed_secs = output.stats.elapsed.as_secs_f64(),
        peak_live_chunks = output.stats.peak_live_chunks,
        peak_memory_bytes = resources.peak_memory_bytes(),
        mean_cpu_percent = resources.mean_cpu_percent(),
        product_sum,
        "benchmark finished"
    );

    Ok(BenchmarkReport {
        ecdf,
        resources,
        stats: output.stats,
        profile: profiler.summary(),
        product_shape: product.shape().to_vec(),
        product_sum,
        artifacts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lazydot_exec::OpKind;

    #[test]
    fn test_default_shapes_are_consistent() {
        let config = BenchmarkConfig::default();
        assert_eq!(config.flat_len(), 1_000_000_000);
        assert_eq!(config.flat_len() % config.flat_chunk, 0);
        assert_eq!(config.sample_interval, Duration::from_secs(300));
        assert_eq!(config.ecdf_prefix, 1_000);
    }

    #[test]
    fn test_full_size_graph_chunking() {
        let config = BenchmarkConfig::default();
        let builder = GraphBuilder::new(0);

        let b = builder
            .chunking(
                &Shape::new(vec![config.inner, config.rows]).unwrap(),
                &[ChunkSize::Auto, ChunkSize::Fixed(config.block)],
            )
            .unwrap();
        assert_eq!(b.extents(0), &[1_000]);
        assert_eq!(b.extents(1).len(), 100);

        let c = builder
            .chunking(
                &Shape::new(vec![config.rows, 1]).unwrap(),
                &[ChunkSize::Fixed(config.block), ChunkSize::Auto],
            )
            .unwrap();
        assert_eq!(c.extents(1), &[1]);
        assert_eq!(c.total_chunks(), 100);
    }

    #[test]
    fn test_full_size_graph_task_counts() {
        let graphs = build_graphs(&BenchmarkConfig::default()).unwrap();
        let counts = graphs.graph.op_counts();

        // A, B and C have 100 chunks each
        assert_eq!(counts.get(&OpKind::Generate).copied(), Some(300));
        // 100 reshaped blocks of A plus the ECDF prefix; the rechunk adds nothing
        assert_eq!(counts.get(&OpKind::Reshape).copied(), Some(101));
        // 100 x 100 blocks of A·B, then 100 row blocks of D
        assert_eq!(counts.get(&OpKind::MultiplyAccumulate).copied(), Some(10_100));
        assert_eq!(graphs.graph.len(), 10_501);

        assert_eq!(graphs.a.chunking().extents(0).len(), 100);
        assert_eq!(graphs.a.chunking().extents(1), &[1_000]);
        assert_eq!(graphs.product.tasks().len(), 100);
        assert_eq!(graphs.product.shape().dims(), &[1_000_000, 1]);
        assert_eq!(graphs.sample.shape().dims(), &[1_000]);
    }

    #[test]
    fn test_scaled_graphs() {
        let config = BenchmarkConfig::default().scaled(5_000);
        assert_eq!(config.rows, 200);
        assert_eq!(config.inner, 1);
        assert_eq!(config.block, 2);

        let graphs = build_graphs(&config).unwrap();
        assert_eq!(graphs.product.shape().dims(), &[200, 1]);
        assert_eq!(graphs.sample.shape().dims(), &[200]);
        assert_eq!(graphs.a.chunking().extents(0).len(), 100);
    }

    #[test]
    fn test_rechunk_of_reshaped_a_is_free() {
        let config = BenchmarkConfig {
            rows: 1_000,
            inner: 100,
            flat_chunk: 10_000,
            block: 100,
            ..BenchmarkConfig::default()
        };
        let graphs = build_graphs(&config).unwrap();

        // Reshape yields (100, 100) blocks, so rechunking to (100, auto) adds no tasks
        assert_eq!(graphs.a.chunking().extents(0), &[100; 10]);
        assert_eq!(graphs.a.chunking().extents(1), &[100]);
        let reshapes = graphs
            .graph
            .op_counts()
            .get(&OpKind::Reshape)
            .copied()
            .unwrap_or(0);
        // Ten reshape tasks plus the single prefix copy
        assert_eq!(reshapes, 11);
    }

    #[test]
    fn test_scale_factor_zero_is_identity() {
        assert_eq!(BenchmarkConfig::default().scaled(0), BenchmarkConfig::default());
    }
}
