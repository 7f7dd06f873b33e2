//! `scalesim run`: execute one configured simulation and print its summary.

use std::path::Path;

use anyhow::{Context, Result, bail};
use scalesim_core::SimConfig;
use scalesim_metrics::{RunSummary, render_text};

pub fn run(config: &Path, format: &str, horizon: Option<f64>) -> Result<()> {
    let summary = execute(config, horizon)?;
    println!("{}", render(&summary, format)?);
    Ok(())
}

/// Load, validate and run the config at `path`.
pub fn execute(path: &Path, horizon: Option<f64>) -> Result<RunSummary> {
    let mut config = SimConfig::from_file(path)
        .with_context(|| format!("loading {}", path.display()))?;
    if let Some(horizon) = horizon {
        config.run.horizon = horizon;
    }
    let result = scalesim_model::run(&config)
        .with_context(|| format!("simulating {}", path.display()))?;
    Ok(result.summary)
}

pub fn render(summary: &RunSummary, format: &str) -> Result<String> {
    match format {
        "json" => Ok(serde_json::to_string_pretty(summary)?),
        "text" => Ok(render_text(summary)),
        other => bail!("unknown output format: {other} (expected text or json)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scalesim_core::config::ArrivalConfig;

    fn write_config(dir: &Path) -> std::path::PathBuf {
        let mut config = SimConfig::scaffold("cli");
        config.run.horizon = 1_800.0;
        config.arrivals = ArrivalConfig::Poisson {
            lambda: 0.2,
            mu: 0.02,
            max_customers: None,
            regenerate_service: false,
            resample_budget: 100,
        };
        let path = dir.join("cli.toml");
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();
        path
    }

    #[test]
    fn runs_config_with_horizon_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path());
        let summary = execute(&path, Some(600.0)).unwrap();
        assert_eq!(summary.horizon, 600.0);
        assert_eq!(summary.name.as_deref(), Some("cli"));
        assert_eq!(summary.config_digest.len(), 64);
    }

    #[test]
    fn renders_json_and_text() {
        let dir = tempfile::tempdir().unwrap();
        let summary = execute(&write_config(dir.path()), None).unwrap();

        let json: serde_json::Value = serde_json::from_str(&render(&summary, "json").unwrap()).unwrap();
        assert_eq!(json["horizon"], 1_800.0);
        assert!(render(&summary, "text").unwrap().contains("scalesim_arrivals_total{run=\"cli\"}"));
        assert!(render(&summary, "yaml").is_err());
    }

    #[test]
    fn missing_config_names_the_path() {
        let err = execute(Path::new("/nonexistent/run.toml"), None).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/run.toml"));
    }
}
