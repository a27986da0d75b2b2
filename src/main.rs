use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use windowgate::config::WindowgateConfig;
use windowgate::http::{self, AppState};
use windowgate::persistence;
use windowgate::ratelimit::RateLimiter;

/// Sliding-window admission control service.
#[derive(Parser, Debug)]
#[command(name = "windowgate", version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP listen address
    #[arg(long)]
    listen_addr: Option<SocketAddr>,

    /// Request header carrying the client identity
    #[arg(long)]
    identity_header: Option<String>,

    /// Hits admitted per client within the client window
    #[arg(long)]
    allowed_rate: Option<i64>,

    /// Global tally window in seconds
    #[arg(long)]
    global_window_secs: Option<i64>,

    /// Per-client window in seconds
    #[arg(long)]
    ip_window_secs: Option<i64>,

    /// Dump file location
    #[arg(long)]
    dump_file: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn apply(&self, config: &mut WindowgateConfig) {
        if let Some(addr) = self.listen_addr {
            config.server.listen_addr = addr;
        }
        if let Some(header) = &self.identity_header {
            config.server.identity_header = header.clone();
        }
        if let Some(rate) = self.allowed_rate {
            config.rate_limiting.allowed_rate = rate;
        }
        if let Some(secs) = self.global_window_secs {
            config.rate_limiting.global_window_secs = secs;
        }
        if let Some(secs) = self.ip_window_secs {
            config.rate_limiting.ip_window_secs = secs;
        }
        if let Some(path) = &self.dump_file {
            config.persistence.path = path.clone();
        }
    }
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_thread_ids(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    info!("Starting Windowgate Admission Control Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config =
        WindowgateConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    cli.apply(&mut config);
    config.validate()?;
    info!(
        listen_addr = %config.server.listen_addr,
        dump_file = %config.persistence.path.display(),
        format = ?config.persistence.resolved_format(),
        "Configuration loaded"
    );

    let store = persistence::open(
        config.persistence.resolved_format(),
        config.persistence.path.clone(),
    );
    let rate_limiter = Arc::new(
        RateLimiter::new(config.limiter_settings(), store)
            .context("failed to restore persisted windows")?,
    );

    let state = AppState::new(rate_limiter.clone(), &config.server.identity_header)?;
    let listener = TcpListener::bind(config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.listen_addr))?;
    let grace = Duration::from_secs(config.server.shutdown_grace_secs);

    // The server runs in its own task so a panic there still reaches the dump below.
    let server = tokio::spawn(http::serve_with_shutdown(
        listener,
        http::router(state),
        shutdown_signal(),
        grace,
    ));

    let server_result = match server.await {
        Ok(Ok(())) => {
            info!("Application stopped accepting requests, dumping windows");
            Ok(())
        }
        Ok(Err(e)) => {
            error!(error = %e, "HTTP server failed, dumping windows");
            Err(anyhow::Error::new(e))
        }
        Err(e) if e.is_panic() => {
            error!("Recovering from panic, dumping windows");
            Err(anyhow::anyhow!("server task panicked"))
        }
        Err(e) => {
            error!(error = %e, "Server task aborted, dumping windows");
            Err(anyhow::Error::new(e))
        }
    };

    if let Err(e) = rate_limiter.dump() {
        error!(error = %e, "Dumping windows failed");
        std::process::exit(1);
    }
    info!("Dumping windows complete, exiting");

    server_result
}

/// Signal that ends request intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopSignal {
    Interrupt,
    Terminate,
}

impl StopSignal {
    fn as_str(self) -> &'static str {
        match self {
            StopSignal::Interrupt => "SIGINT",
            StopSignal::Terminate => "SIGTERM",
        }
    }
}

/// Resolve with whichever of the two signal sources fires first.
async fn first_stop_signal<I, T>(interrupt: I, terminate: T) -> StopSignal
where
    I: Future<Output = ()>,
    T: Future<Output = ()>,
{
    tokio::select! {
        _ = interrupt => StopSignal::Interrupt,
        _ = terminate => StopSignal::Terminate,
    }
}

/// Wait until the process is asked to stop.
///
/// A signal source that cannot be installed is logged and never fires, so
/// the other one still stops the service.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let received = first_stop_signal(interrupt, terminate).await;
    info!(
        signal = received.as_str(),
        "Refusing new connections, windows are dumped once in-flight requests drain"
    );
}
