use anyhow::{Context, Result};
use lazydot::{run_benchmark, BenchmarkConfig};
use lazydot_exec::tracing_support::{init_tracing, TracingConfig};

fn main() -> Result<()> {
    init_tracing(TracingConfig::default()).context("initializing logging")?;

    let config = BenchmarkConfig::from_env().context("reading configuration")?;
    tracing::info!(
        rows = config.rows,
        inner = config.inner,
        block = config.block,
        workers = config.exec.resolved_workers(),
        sample_interval_secs = config.sample_interval.as_secs_f64(),
        out_dir = %config.out_dir.display(),
        "starting benchmark"
    );

    let report = run_benchmark(&config)?;

    println!(
        "D {:?}: sum {:.6e}, {} tasks in {:.2}s, peak {} live chunks",
        report.product_shape,
        report.product_sum,
        report.stats.tasks_completed,
        report.stats.elapsed.as_secs_f64(),
        report.stats.peak_live_chunks
    );
    print!("{}", report.resources.render_text(60));
    println!("ECDF:      {}", report.artifacts.ecdf.display());
    println!("Resources: {}", report.artifacts.resources.display());
    println!("Chart:     {}", report.artifacts.resources_chart.display());
    Ok(())
}
