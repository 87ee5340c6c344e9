//! Benchmark output files
//!
//! Each file is written to a temporary sibling and renamed into place, and all
//! contents are serialized before the first write.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use lazydot_core::EmpiricalDistribution;
use lazydot_exec::ResourceSeries;

/// ECDF points as JSON
pub const ECDF_FILE: &str = "ecdf.json";
/// Resource series as JSON
pub const RESOURCES_FILE: &str = "resources.json";
/// Resource series as a text chart
pub const RESOURCES_CHART_FILE: &str = "resources.txt";

const CHART_WIDTH: usize = 60;

/// Locations of the written artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub ecdf: PathBuf,
    pub resources: PathBuf,
    pub resources_chart: PathBuf,
}

impl ArtifactPaths {
    /// Paths of the artifacts inside `dir`
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            ecdf: dir.join(ECDF_FILE),
            resources: dir.join(RESOURCES_FILE),
            resources_chart: dir.join(RESOURCES_CHART_FILE),
        }
    }
}

/// Write all artifacts into `dir`, creating it if needed
pub fn write_artifacts(
    dir: &Path,
    ecdf: &EmpiricalDistribution,
    resources: &ResourceSeries,
) -> Result<ArtifactPaths> {
    let paths = ArtifactPaths::in_dir(dir);

    let ecdf_json = serde_json::to_vec_pretty(ecdf).context("serializing the ECDF")?;
    let resources_json =
        serde_json::to_vec_pretty(resources).context("serializing the resource series")?;
    let chart = resources.render_text(CHART_WIDTH);

    fs::create_dir_all(dir)
        .with_context(|| format!("cannot create output directory {}", dir.display()))?;
    write_atomic(&paths.ecdf, &ecdf_json)?;
    write_atomic(&paths.resources, &resources_json)?;
    write_atomic(&paths.resources_chart, chart.as_bytes())?;

    tracing::info!(dir = %dir.display(), "artifacts written");
    Ok(paths)
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    fs::write(&temp_path, contents)
        .with_context(|| format!("cannot write {}", temp_path.display()))?;
    fs::rename(&temp_path, path)
        .with_context(|| format!("cannot rename {} to {}", temp_path.display(), path.display()))?;
    Ok(())
}
