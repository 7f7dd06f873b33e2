//! `scalesim sweep`: run every config in a directory tree.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use serde_json::json;
use tracing::{info, warn};
use walkdir::WalkDir;

use super::run::execute;

/// `*.toml` files under `dir`, in path order.
pub fn collect_configs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut configs = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() && entry.path().extension().is_some_and(|ext| ext == "toml") {
            configs.push(entry.into_path());
        }
    }
    Ok(configs)
}

pub fn sweep(dir: &Path, format: &str) -> Result<()> {
    let configs = collect_configs(dir)?;
    if configs.is_empty() {
        bail!("no *.toml configs under {}", dir.display());
    }
    info!(dir = %dir.display(), configs = configs.len(), "starting sweep");

    let mut rows = Vec::new();
    let mut failures = 0;
    for path in &configs {
        match execute(path, None) {
            Ok(summary) => rows.push((path, summary)),
            Err(e) => {
                warn!(config = %path.display(), error = %format!("{e:#}"), "run failed");
                failures += 1;
            }
        }
    }

    match format {
        "json" => {
            let runs: Vec<_> = rows
                .iter()
                .map(|(path, summary)| json!({ "config": path.display().to_string(), "summary": summary }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&runs)?);
        }
        _ => {
            println!(
                "{:<40} {:>10} {:>10} {:>12} {:>12}",
                "CONFIG", "ARRIVALS", "BLOCKED", "BLOCK_RATIO", "UTILIZATION"
            );
            for (path, summary) in &rows {
                println!(
                    "{:<40} {:>10} {:>10} {:>12} {:>12}",
                    path.strip_prefix(dir).unwrap_or(path).display(),
                    summary.arrivals,
                    summary.blocked,
                    fmt_opt(summary.blocking_ratio),
                    fmt_opt(summary.utilization),
                );
            }
        }
    }

    if failures > 0 {
        bail!("{failures} of {} runs failed", configs.len());
    }
    Ok(())
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.4}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use scalesim_core::SimConfig;

    #[test]
    fn collects_nested_toml_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("b.toml"), "").unwrap();
        std::fs::write(dir.path().join("a.toml"), "").unwrap();
        std::fs::write(dir.path().join("nested/c.toml"), "").unwrap();
        std::fs::write(dir.path().join("users.csv"), "").unwrap();

        let names: Vec<_> = collect_configs(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().display().to_string())
            .collect();
        assert_eq!(names, vec!["a.toml", "b.toml", "nested/c.toml"]);
    }

    #[test]
    fn sweep_reports_failed_runs() {
        let dir = tempfile::tempdir().unwrap();
        let mut good = SimConfig::scaffold("good");
        good.run.horizon = 600.0;
        std::fs::write(dir.path().join("good.toml"), good.to_toml_string().unwrap()).unwrap();
        std::fs::write(dir.path().join("bad.toml"), "[run]\nseed = \"x\"\n").unwrap();

        let err = sweep(dir.path(), "text").unwrap_err();
        assert!(err.to_string().contains("1 of 2 runs failed"));
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(sweep(dir.path(), "text").is_err());
    }
}
