use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use cdp_adapter::{event_bus, metrics, CdpAdapter, RawEvent};
use clap::Args;
use mediflow_e2e::{Config, ScenarioKind, ScenarioRunner};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use super::output::emit;
use crate::cli::context::CliContext;

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Scenarios to run, in order
    #[arg(value_enum)]
    pub scenarios: Vec<ScenarioKind>,

    /// Base URL of the application under test
    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,

    /// Attach to an existing browser DevTools websocket instead of launching Chromium
    #[arg(long, value_name = "WS_URL")]
    pub ws_url: Option<String>,

    /// Show the browser window
    #[arg(long)]
    pub headful: bool,

    /// Directory for failure screenshots
    #[arg(long, value_name = "DIR")]
    pub artifacts: Option<PathBuf>,

    /// Do not save screenshots when a scenario fails
    #[arg(long, conflicts_with = "artifacts")]
    pub no_screenshots: bool,

    /// Write adapter metrics in Prometheus text format to this file
    #[arg(long, value_name = "FILE")]
    pub metrics_out: Option<PathBuf>,
}

pub async fn cmd_run(args: RunArgs, ctx: &CliContext) -> Result<()> {
    let mut config = ctx.config().clone();
    apply_overrides(&mut config, &args);
    config.validate().context("invalid configuration")?;

    let kinds = if args.scenarios.is_empty() {
        ScenarioKind::ALL.to_vec()
    } else {
        args.scenarios.clone()
    };

    let (bus, events) = event_bus(64);
    let watcher = tokio::spawn(log_browser_events(events));
    let adapter = Arc::new(
        CdpAdapter::new(config.browser.clone(), bus).context("initialising browser adapter")?,
    );
    if adapter.mode().is_stub() {
        watcher.abort();
        bail!("no Chromium browser available; install Chrome/Chromium, set MEDIFLOW_CHROME or pass --ws-url");
    }
    Arc::clone(&adapter)
        .start()
        .await
        .context("starting browser")?;

    let artifacts = config
        .screenshot_on_failure
        .then(|| config.artifacts_dir.clone());
    let runner = ScenarioRunner::new(Arc::clone(&adapter), Arc::new(config))
        .with_mode(adapter.mode())
        .with_artifacts(artifacts);

    let mut report = tokio::select! {
        report = runner.run_all(&kinds) => report,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted; shutting down browser");
            adapter.shutdown().await;
            watcher.abort();
            bail!("run interrupted");
        }
    };
    report.metrics = Some(metrics::snapshot());
    adapter.shutdown().await;
    watcher.abort();

    if let Some(path) = &args.metrics_out {
        let text = metrics::render_text().context("encoding adapter metrics")?;
        tokio::fs::write(path, text)
            .await
            .with_context(|| format!("writing metrics to {}", path.display()))?;
        info!(path = %path.display(), "wrote adapter metrics");
    }

    emit(ctx.output(), &report, || report.render_human())?;
    info!(
        run_id = %report.run_id,
        passed = report.passed_count(),
        failed = report.failed_count(),
        "run finished"
    );

    if !report.all_passed() {
        bail!(
            "{} of {} scenarios failed",
            report.failed_count(),
            report.scenarios.len()
        );
    }
    Ok(())
}

/// Surface adapter events in the run log. Returns the number of errors seen once the bus closes.
async fn log_browser_events(mut events: broadcast::Receiver<RawEvent>) -> usize {
    let mut errors = 0;
    loop {
        match events.recv().await {
            Ok(RawEvent::Error { page, message }) => {
                errors += 1;
                warn!(target: "mediflow", ?page, %message, "browser error");
            }
            Ok(RawEvent::PageNavigated { page, url, .. }) => {
                debug!(target: "mediflow", ?page, %url, "page navigated");
            }
            Ok(RawEvent::PageLifecycle { page, phase, .. }) => {
                debug!(target: "mediflow", ?page, %phase, "page lifecycle");
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(target: "mediflow", skipped, "browser event log lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
    errors
}

fn apply_overrides(config: &mut Config, args: &RunArgs) {
    if let Some(base_url) = &args.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(ws_url) = &args.ws_url {
        config.browser.websocket_url = Some(ws_url.clone());
    }
    if args.headful {
        config.browser.headless = false;
    }
    if let Some(dir) = &args.artifacts {
        config.artifacts_dir = dir.clone();
        config.screenshot_on_failure = true;
    }
    if args.no_screenshots {
        config.screenshot_on_failure = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::env::CliArgs;
    use crate::cli::commands::Commands;
    use clap::Parser;

    fn parse_run(argv: &[&str]) -> RunArgs {
        let cli = CliArgs::try_parse_from(argv).unwrap();
        match cli.command {
            Commands::Run(args) => args,
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn parses_scenarios_and_flags() {
        let args = parse_run(&[
            "mediflow",
            "run",
            "doctor-login",
            "prescription-handoff",
            "--base-url",
            "http://127.0.0.1:4173/",
            "--headful",
            "--artifacts",
            "out",
        ]);
        assert_eq!(
            args.scenarios,
            vec![ScenarioKind::DoctorLogin, ScenarioKind::PrescriptionHandoff]
        );

        let mut config = Config::default();
        config.screenshot_on_failure = false;
        apply_overrides(&mut config, &args);
        assert_eq!(config.base_url, "http://127.0.0.1:4173/");
        assert!(!config.browser.headless);
        assert_eq!(config.artifacts_dir, PathBuf::from("out"));
        assert!(config.screenshot_on_failure);
    }

    #[test]
    fn ws_url_and_screenshot_opt_out() {
        let args = parse_run(&[
            "mediflow",
            "run",
            "--ws-url",
            "ws://127.0.0.1:9222/devtools/browser/abc",
            "--no-screenshots",
        ]);
        assert!(args.scenarios.is_empty());

        let mut config = Config::default();
        apply_overrides(&mut config, &args);
        assert_eq!(
            config.browser.websocket_url.as_deref(),
            Some("ws://127.0.0.1:9222/devtools/browser/abc")
        );
        assert!(!config.screenshot_on_failure);
    }

    #[tokio::test]
    async fn browser_errors_are_counted_until_bus_closes() {
        let (bus, events) = event_bus(8);
        let watcher = tokio::spawn(log_browser_events(events));
        bus.send(RawEvent::PageNavigated {
            page: cdp_adapter::PageId::new(),
            url: "http://localhost:5173/".into(),
            ts: 0,
        })
        .unwrap();
        bus.send(RawEvent::Error {
            page: None,
            message: "cdp transport restarted; active pages were reset".into(),
        })
        .unwrap();
        drop(bus);
        assert_eq!(watcher.await.unwrap(), 1);
    }

    #[test]
    fn metrics_out_is_parsed() {
        let args = parse_run(&["mediflow", "run", "--metrics-out", "metrics.prom"]);
        assert_eq!(args.metrics_out, Some(PathBuf::from("metrics.prom")));
    }

    #[test]
    fn rejects_unknown_scenarios() {
        assert!(CliArgs::try_parse_from(["mediflow", "run", "nurse-login"]).is_err());
    }
}
