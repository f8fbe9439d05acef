//! Demo binary: serves a page with a live sine wave.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use plotlive::config::{DEFAULT_PULL_INTERVAL, DEFAULT_PUSH_INTERVAL};
use plotlive::plot::Axis;
use plotlive::{
    HtmlFragment, Plot, PlotPage, PlotServer, PlotState, ServerConfig, Trace, UpdateMode,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Live-updating plot server.
#[derive(Parser)]
#[command(name = "plotlive", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the demo page.
    Serve {
        /// Port override (`0` picks a free port).
        #[arg(short, long)]
        port: Option<u16>,

        /// Update mode override.
        #[arg(short, long, value_enum)]
        mode: Option<ModeArg>,

        /// Update interval override, in milliseconds.
        #[arg(short, long)]
        interval_ms: Option<u64>,

        /// How often the demo mutates its plot, in milliseconds.
        #[arg(long, default_value_t = 500)]
        tick_ms: u64,
    },

    /// Write the default configuration to a file.
    InitConfig {
        /// Destination path.
        path: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    None,
    Push,
    Pull,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("plotlive=info,tower_http=warn")),
        )
        .init();

    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };

    match cli.command.unwrap_or(Command::Serve {
        port: None,
        mode: None,
        interval_ms: None,
        tick_ms: 500,
    }) {
        Command::Serve {
            port,
            mode,
            interval_ms,
            tick_ms,
        } => {
            let config = apply_overrides(config, port, mode, interval_ms);
            serve(config, Duration::from_millis(tick_ms.max(1))).await
        }
        Command::InitConfig { path } => {
            config.save_to_file(&path)?;
            println!("Wrote {}", path.display());
            Ok(())
        }
    }
}

fn apply_overrides(
    mut config: ServerConfig,
    port: Option<u16>,
    mode: Option<ModeArg>,
    interval_ms: Option<u64>,
) -> ServerConfig {
    if let Some(port) = port {
        config.port = port;
    }
    config = match mode {
        Some(ModeArg::None) => {
            config.update.mode = UpdateMode::None;
            config
        }
        Some(ModeArg::Push) => config.push_updates(DEFAULT_PUSH_INTERVAL),
        Some(ModeArg::Pull) => config.pull_updates(DEFAULT_PULL_INTERVAL),
        None => config,
    };
    if let Some(interval_ms) = interval_ms {
        config.update.interval_ms = interval_ms;
    }
    config
}

fn sine(phase: f64) -> (Vec<f64>, Vec<f64>) {
    (0..200)
        .map(|i| {
            let x = f64::from(i) * 0.05;
            (x, (x + phase).sin())
        })
        .unzip()
}

async fn serve(config: ServerConfig, tick: Duration) -> anyhow::Result<()> {
    let (x, y) = sine(0.0);
    let mut plot = Plot::new();
    let mut trace = Trace::xy(x, y);
    trace.set_name("sin").set_mode("lines");
    plot.add_trace(trace);
    plot.layout_mut()
        .set_title("Live sine")
        .set_xaxis(&Axis {
            title: Some("x".to_owned()),
            kind: None,
        })
        .set_yaxis(&Axis {
            title: Some("sin(x + t)".to_owned()),
            kind: None,
        });
    let state = PlotState::with_id("sine", plot).shared();

    let mode = config.update.mode;
    let server = PlotServer::new(config)
        .header(HtmlFragment::new(
            r#"<meta name="viewport" content="width=device-width, initial-scale=1">"#,
        ))
        .page(PlotPage::single("/", state.clone()).with_title("plotlive demo"))
        .start()
        .await?;

    println!("plotlive v{}", env!("CARGO_PKG_VERSION"));
    println!("Serving {} ({mode} updates)", server.base_url());

    let cancel = server.cancellation_token();
    let ticker = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        let mut phase = 0.0_f64;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    phase += 0.1;
                    let (_, y) = sine(phase);
                    state.mutate(|p| {
                        if let Some(trace) = p.trace_mut(0) {
                            trace.set_y(y);
                        }
                    });
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    server.stop().await;
    ticker.await?;
    Ok(())
}
