//! Run summary and its text exposition.

use serde::Serialize;

use scalesim_core::SimTime;

use crate::collector::{Metric, Recorder};
use crate::stats::{
    BatchMean, SECONDS_IN_A_DAY, SECONDS_IN_AN_HOUR, TimescaleSummary, batch_means,
    bucket_means, mean, percentile,
};

/// Run-level facts that do not come from the observation streams.
#[derive(Debug, Clone, Default)]
pub struct RunFacts {
    pub name: Option<String>,
    pub config_digest: String,
    pub density: u32,
    pub horizon: SimTime,
    /// Observations before this instant are excluded from the estimates.
    pub warmup: SimTime,
    pub end_time: SimTime,
    pub events_processed: u64,
    pub vms_provisioned: u64,
    pub vms_deleted: u64,
    pub regenerated_services: u64,
    pub truncated_observations: usize,
}

/// Headline results of one simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub name: Option<String>,
    pub config_digest: String,
    pub horizon: SimTime,
    pub warmup: SimTime,
    pub end_time: SimTime,
    pub events_processed: u64,
    pub arrivals: usize,
    pub served: usize,
    pub blocked: usize,
    pub blocking_ratio: Option<f64>,
    pub blocking_probability: Option<BatchMean>,
    pub blocking_by_hour: Option<TimescaleSummary>,
    pub blocking_by_day: Option<TimescaleSummary>,
    pub wait_time: Option<BatchMean>,
    pub wait_time_p99: Option<f64>,
    pub mean_num_servers: Option<f64>,
    pub total_provisioned_time: f64,
    pub utilization: Option<f64>,
    pub vms_provisioned: u64,
    pub vms_deleted: u64,
    pub regenerated_services: u64,
    pub truncated_observations: usize,
}

impl RunSummary {
    pub fn from_recorder(recorder: &Recorder, facts: RunFacts) -> Self {
        let warmup = facts.warmup.max(0.0);
        let measured = (facts.horizon - warmup).max(0.0);
        let values_after = |metric: Metric| -> Vec<f64> {
            recorder
                .after(metric, warmup)
                .into_iter()
                .map(|o| o.value)
                .collect()
        };

        let blocked_series = recorder.after(Metric::Blocked, warmup);
        let blocked_flags: Vec<f64> = blocked_series.iter().map(|o| o.value).collect();
        let blocked = blocked_flags.iter().filter(|v| **v > 0.0).count();
        let blocking_ratio = mean(&blocked_flags);

        let waits = values_after(Metric::WaitTime);
        let provisioned = values_after(Metric::ServerProvisionLength);
        let accepted = values_after(Metric::AcceptedServiceTime);

        let total_provisioned_time: f64 = provisioned.iter().sum();
        let seat_time = total_provisioned_time * f64::from(facts.density);
        let utilization =
            (seat_time > 0.0).then(|| accepted.iter().sum::<f64>() / seat_time);

        let timescale = |interval: SimTime| {
            TimescaleSummary::from_buckets(&bucket_means(&blocked_series, interval, measured))
        };

        Self {
            name: facts.name,
            config_digest: facts.config_digest,
            horizon: facts.horizon,
            warmup,
            end_time: facts.end_time,
            events_processed: facts.events_processed,
            arrivals: recorder.after(Metric::Arrival, warmup).len(),
            served: blocked_flags.len() - blocked,
            blocked,
            blocking_ratio,
            blocking_probability: batch_means(&blocked_flags),
            blocking_by_hour: timescale(SECONDS_IN_AN_HOUR),
            blocking_by_day: timescale(SECONDS_IN_A_DAY),
            wait_time: batch_means(&waits),
            wait_time_p99: percentile(&waits, 99.0),
            mean_num_servers: mean(&values_after(Metric::NumServers)),
            total_provisioned_time,
            utilization,
            vms_provisioned: facts.vms_provisioned,
            vms_deleted: facts.vms_deleted,
            regenerated_services: facts.regenerated_services,
            truncated_observations: facts.truncated_observations,
        }
    }
}

fn gauge(out: &mut String, name: &str, help: &str, run: &str, value: Option<f64>) {
    let Some(value) = value else {
        return;
    };
    out.push_str(&format!("# HELP scalesim_{name} {help}\n"));
    out.push_str(&format!("# TYPE scalesim_{name} gauge\n"));
    out.push_str(&format!("scalesim_{name}{{run=\"{run}\"}} {value:.6}\n"));
}

fn counter(out: &mut String, name: &str, help: &str, run: &str, value: u64) {
    out.push_str(&format!("# HELP scalesim_{name} {help}\n"));
    out.push_str(&format!("# TYPE scalesim_{name} counter\n"));
    out.push_str(&format!("scalesim_{name}{{run=\"{run}\"}} {value}\n"));
}

/// Render a summary in the Prometheus text exposition format, one
/// `run`-labelled sample per figure. Figures without enough data are
/// omitted.
pub fn render_text(summary: &RunSummary) -> String {
    let run = summary.name.as_deref().unwrap_or("unnamed");
    let mut out = String::new();

    counter(&mut out, "events_processed_total", "Engine events processed.", run, summary.events_processed);
    counter(&mut out, "arrivals_total", "Customers that arrived after warmup.", run, summary.arrivals as u64);
    counter(&mut out, "served_total", "Customers placed into service.", run, summary.served as u64);
    counter(&mut out, "blocked_total", "Customers refused service.", run, summary.blocked as u64);
    gauge(&mut out, "blocking_ratio", "Fraction of customers refused service.", run, summary.blocking_ratio);
    gauge(
        &mut out,
        "blocking_probability",
        "Batch-means blocking probability.",
        run,
        summary.blocking_probability.map(|b| b.average),
    );
    gauge(
        &mut out,
        "blocking_probability_delta",
        "Half-width of the 95% blocking probability interval.",
        run,
        summary.blocking_probability.map(|b| b.delta),
    );
    gauge(
        &mut out,
        "blocking_hourly_p99",
        "99th percentile of hourly blocking probability.",
        run,
        summary.blocking_by_hour.map(|s| s.p99),
    );
    gauge(
        &mut out,
        "blocking_daily_p99",
        "99th percentile of daily blocking probability.",
        run,
        summary.blocking_by_day.map(|s| s.p99),
    );
    gauge(&mut out, "wait_time_seconds", "Batch-means wait time.", run, summary.wait_time.map(|b| b.average));
    gauge(&mut out, "wait_time_p99_seconds", "99th percentile wait time.", run, summary.wait_time_p99);
    gauge(&mut out, "num_servers_mean", "Mean VM count seen by customers.", run, summary.mean_num_servers);
    gauge(
        &mut out,
        "provisioned_seconds",
        "Total VM provisioned time.",
        run,
        Some(summary.total_provisioned_time),
    );
    gauge(&mut out, "utilization", "Served seat time over provisioned seat time.", run, summary.utilization);
    counter(&mut out, "vms_provisioned_total", "VMs created.", run, summary.vms_provisioned);
    counter(&mut out, "vms_deleted_total", "VMs retired by the autoscaler.", run, summary.vms_deleted);
    counter(
        &mut out,
        "regenerated_services_total",
        "Service times resampled before the next tick.",
        run,
        summary.regenerated_services,
    );

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::ObservationSink;

    fn facts() -> RunFacts {
        RunFacts {
            name: Some("unit".into()),
            config_digest: "abc".into(),
            density: 2,
            horizon: 100.0,
            end_time: 100.0,
            ..RunFacts::default()
        }
    }

    #[test]
    fn summary_counts_blocked_and_served() {
        let mut recorder = Recorder::new();
        for (i, blocked) in [0.0, 1.0, 0.0, 0.0].into_iter().enumerate() {
            recorder.observe(Metric::Arrival, 1.0, i as f64);
            recorder.observe(Metric::Blocked, blocked, i as f64);
        }
        let summary = RunSummary::from_recorder(&recorder, facts());
        assert_eq!(summary.arrivals, 4);
        assert_eq!(summary.blocked, 1);
        assert_eq!(summary.served, 3);
        assert_eq!(summary.blocking_ratio, Some(0.25));
        assert!(summary.blocking_probability.is_none());
    }

    #[test]
    fn utilization_is_service_over_seat_time() {
        let mut recorder = Recorder::new();
        recorder.observe(Metric::ServerProvisionLength, 100.0, 0.0);
        recorder.observe(Metric::AcceptedServiceTime, 50.0, 10.0);
        let summary = RunSummary::from_recorder(&recorder, facts());
        assert_eq!(summary.total_provisioned_time, 100.0);
        assert_eq!(summary.utilization, Some(0.25));
    }

    #[test]
    fn warmup_excludes_early_observations() {
        let mut recorder = Recorder::new();
        recorder.observe(Metric::WaitTime, 90.0, 5.0);
        recorder.observe(Metric::WaitTime, 1.0, 60.0);
        let summary = RunSummary::from_recorder(
            &recorder,
            RunFacts {
                warmup: 50.0,
                ..facts()
            },
        );
        assert_eq!(summary.wait_time_p99, Some(1.0));
    }

    #[test]
    fn text_rendering_labels_every_sample() {
        let mut recorder = Recorder::new();
        recorder.observe(Metric::Blocked, 0.0, 1.0);
        let text = render_text(&RunSummary::from_recorder(&recorder, facts()));
        assert!(text.contains("# TYPE scalesim_blocked_total counter"));
        assert!(text.contains("scalesim_served_total{run=\"unit\"} 1"));
        assert!(text.contains("scalesim_blocking_ratio{run=\"unit\"} 0.000000"));
        assert!(!text.contains("scalesim_utilization"));
        for line in text.lines().filter(|l| !l.starts_with('#')) {
            assert!(line.contains("{run=\"unit\"}"), "unlabelled sample: {line}");
        }
    }

    #[test]
    fn summary_serializes_to_json() {
        let summary = RunSummary::from_recorder(&Recorder::new(), facts());
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["config_digest"], "abc");
        assert!(json["wait_time"].is_null());
    }
}
