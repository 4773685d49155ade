use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bytengine::server::{Config, Daemon};

#[derive(Parser)]
#[command(name = "bytengine", about = "Bytengine content-database server", version)]
struct Args {
  #[arg(short, long, env = "BYTENGINE_CONFIG")]
  config: Option<String>,
  #[arg(short, long)]
  port: Option<u16>,
  #[arg(long)]
  address: Option<String>,
  #[arg(short, long)]
  workers: Option<usize>,
  #[arg(long)]
  log_level: Option<String>,
}

#[tokio::main]
async fn main() {
  let args = Args::parse();

  // An explicit --config path wins, then auto-detection, then defaults.
  let loaded = match &args.config {
    Some(path) => Config::from_file(path).map(Some),
    None => Config::find_and_load(),
  };
  let mut config = match loaded {
    Ok(config) => config.unwrap_or_default(),
    Err(e) => {
      eprintln!("configuration error: {e}");
      std::process::exit(1);
    }
  };

  // Flags override whatever the file provided.
  if let Some(port) = args.port {
    config.port = port;
  }
  if let Some(address) = args.address {
    config.address = address;
  }
  if let Some(workers) = args.workers {
    config.workers = workers;
  }
  if let Some(level) = args.log_level {
    config.logging.level = level;
  }

  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into()),
    )
    .with(tracing_subscriber::fmt::layer())
    .init();

  let daemon = match Daemon::new(config).await {
    Ok(daemon) => std::sync::Arc::new(daemon),
    Err(e) => {
      tracing::error!("{e}");
      std::process::exit(e.exit_code());
    }
  };

  let signal_daemon = daemon.clone();
  tokio::spawn(async move {
    wait_for_stop_signal().await;
    signal_daemon.shutdown();
  });

  if let Err(e) = daemon.run().await {
    tracing::error!("{e}");
    std::process::exit(e.exit_code());
  }
}

/// Resolves once the process is asked to stop: SIGINT anywhere, SIGTERM
/// additionally on unix.
async fn wait_for_stop_signal() {
  #[cfg(unix)]
  {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
      Ok(mut term) => {
        tokio::select! {
          _ = tokio::signal::ctrl_c() => tracing::info!("interrupt received, stopping"),
          _ = term.recv() => tracing::info!("terminate received, stopping"),
        }
        return;
      }
      Err(e) => tracing::warn!("SIGTERM handler unavailable: {e}"),
    }
  }
  if tokio::signal::ctrl_c().await.is_ok() {
    tracing::info!("interrupt received, stopping");
  }
}
