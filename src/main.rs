use std::path::PathBuf;

use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod ai;
mod api;
mod app;
mod config;
mod db;
mod error;
mod ideas;
mod models;

use app::App;
use config::{Config, StorageKind};
use db::{MemStorage, Repository, Storage};
use error::{AppError, Result};

#[derive(Debug, Default)]
struct Args {
    config_path: Option<PathBuf>,
    bind_addr: Option<String>,
    memory: bool,
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut parsed = Args::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--memory" => parsed.memory = true,
            "--bind" => {
                let addr = iter
                    .next()
                    .ok_or_else(|| AppError::Config("--bind needs an address".to_string()))?;
                parsed.bind_addr = Some(addr.clone());
            }
            "--config" => {
                let path = iter
                    .next()
                    .ok_or_else(|| AppError::Config("--config needs a path".to_string()))?;
                parsed.config_path = Some(PathBuf::from(path));
            }
            other => return Err(AppError::Config(format!("unknown argument '{other}'"))),
        }
    }
    Ok(parsed)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let args = parse_args(&args)?;

    let mut config = match &args.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if args.memory {
        config.storage = StorageKind::Memory;
    }
    if let Some(addr) = args.bind_addr {
        config.bind_addr = addr;
    }

    // RUST_LOG wins over the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match config.storage {
        StorageKind::Memory => {
            tracing::info!("Using in-memory storage");
            run(MemStorage::new(), &config).await
        }
        StorageKind::Sqlite => {
            tracing::info!("Using SQLite database at {}", config.db_path);
            let repository = Repository::new(&config.db_path).await?;
            run(repository, &config).await
        }
    }
}

async fn run<S: Storage>(storage: S, config: &Config) -> Result<()> {
    let app = App::new(storage);
    if config.seed_questions {
        app.seed_default_questions().await?;
    }

    let listener = TcpListener::bind(&config.bind_addr).await?;
    tokio::select! {
        result = api::serve(app, listener) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        let args = parse_args(&strings(&["--memory", "--bind", "0.0.0.0:8080"])).unwrap();
        assert!(args.memory);
        assert_eq!(args.bind_addr.as_deref(), Some("0.0.0.0:8080"));
        assert!(args.config_path.is_none());

        assert!(parse_args(&strings(&["--bind"])).is_err());
        assert!(parse_args(&strings(&["--frobnicate"])).is_err());
    }
}
