//! End-to-end runs of the benchmark at reduced size

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use lazydot::artifacts::{ECDF_FILE, RESOURCES_CHART_FILE, RESOURCES_FILE};
use lazydot::core::EmpiricalDistribution;
use lazydot::exec::{ExecConfig, Executor, ResourceSeries};
use lazydot::{build_graphs, run_benchmark, BenchmarkConfig};
use proptest::prelude::*;
use scirs2_core::ndarray_ext::Array2;

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("lazydot_e2e_{}_{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    dir
}

fn small_config(out_dir: PathBuf) -> BenchmarkConfig {
    BenchmarkConfig {
        rows: 200,
        inner: 10,
        flat_chunk: 500,
        block: 50,
        ecdf_prefix: 100,
        sample_interval: Duration::from_millis(20),
        seed: 99,
        exec: ExecConfig::new().num_workers(2),
        ..BenchmarkConfig::default()
    }
    .out_dir(out_dir)
}

#[test]
fn test_benchmark_writes_artifacts() -> Result<()> {
    let dir = scratch_dir("artifacts");
    let config = small_config(dir.clone());

    let report = run_benchmark(&config)?;

    assert_eq!(report.product_shape, vec![200, 1]);
    assert!(report.product_sum.is_finite());
    assert!(report.product_sum > 0.0);
    assert_eq!(report.ecdf.sample_len(), 100);
    assert_eq!(report.stats.tasks_cancelled, 0);
    assert!(!report.resources.is_empty());

    let ecdf: EmpiricalDistribution = serde_json::from_slice(&fs::read(dir.join(ECDF_FILE))?)?;
    assert_eq!(ecdf, report.ecdf);
    assert!(ecdf.x().iter().all(|&v| (0.0..1.0).contains(&v)));

    let resources: ResourceSeries = serde_json::from_slice(&fs::read(dir.join(RESOURCES_FILE))?)?;
    assert_eq!(resources, report.resources);
    assert!(fs::read_to_string(dir.join(RESOURCES_CHART_FILE))?.contains("mem MiB"));

    fs::remove_dir_all(&dir)?;
    Ok(())
}

#[test]
fn test_product_matches_dense_evaluation() -> Result<()> {
    let config = small_config(scratch_dir("dense"));
    let graphs = build_graphs(&config)?;

    let mut targets = Vec::new();
    for array in [&graphs.a, &graphs.b, &graphs.c, &graphs.product] {
        targets.extend_from_slice(array.tasks());
    }
    let output = Executor::new(config.exec.clone()).execute(&graphs.graph, &targets)?;

    let a: Array2<f64> = graphs.a.assemble(&output)?.into_dimensionality()?;
    let b: Array2<f64> = graphs.b.assemble(&output)?.into_dimensionality()?;
    let c: Array2<f64> = graphs.c.assemble(&output)?.into_dimensionality()?;
    let expected = dense(&a, &b, &c);
    let actual = graphs.product.assemble(&output)?;

    for (x, y) in actual.iter().zip(expected.iter()) {
        assert!((x - y).abs() <= 1e-9 * y.abs().max(1.0), "{} != {}", x, y);
    }
    Ok(())
}

fn dense(a: &Array2<f64>, b: &Array2<f64>, c: &Array2<f64>) -> Array2<f64> {
    a.dot(b).dot(c)
}

#[test]
fn test_sample_is_prefix_of_a() -> Result<()> {
    let config = small_config(scratch_dir("prefix"));
    let graphs = build_graphs(&config)?;

    let mut targets = graphs.sample.tasks().to_vec();
    targets.extend_from_slice(graphs.a.tasks());
    let output = Executor::new(config.exec.clone()).execute(&graphs.graph, &targets)?;

    let sample: Vec<f64> = graphs.sample.assemble(&output)?.iter().copied().collect();
    let a: Vec<f64> = graphs.a.assemble(&output)?.iter().copied().collect();
    assert_eq!(sample, a[..100].to_vec());
    Ok(())
}

#[test]
fn test_failed_build_writes_nothing() {
    let dir = scratch_dir("failed");
    let config = BenchmarkConfig {
        flat_chunk: 0,
        ..small_config(dir.clone())
    };

    assert!(run_benchmark(&config).is_err());
    assert!(!dir.exists());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Every scale factor yields consistent graphs
    #[test]
    fn test_scaled_configs_build(scale in 1usize..2_000_000) {
        let config = BenchmarkConfig {
            rows: 2_000,
            inner: 100,
            flat_chunk: 20_000,
            block: 100,
            ..BenchmarkConfig::default()
        }
        .scaled(scale);

        let graphs = build_graphs(&config).unwrap();
        prop_assert_eq!(graphs.product.shape().dims(), &[config.rows, 1][..]);
        prop_assert_eq!(graphs.a.shape().dims(), &[config.rows, config.inner][..]);
        prop_assert!(graphs.sample.shape().size() <= config.flat_len());
    }
}
