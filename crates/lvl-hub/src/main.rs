mod error;
mod render;
mod routes;

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use lvl_core::session::{DEFAULT_TOKEN_LEN, MAX_GENERATED_TOKEN_LEN, MIN_GENERATED_TOKEN_LEN};
use lvl_core::LevelingEngine;
use lvl_storage::{AnyStore, MemoryStore, SqliteStore, StoreKind};
use render::Renderer;
use routes::AppState;
use std::{
    fs::OpenOptions,
    io::{self, Write},
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tracing::{error, info};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

const DEFAULT_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_DB_PATH: &str = ".lvl/lvl.db";
const LOG_FILE_NAME: &str = "lvl-hub.log";

#[derive(Clone, Debug)]
struct Config {
    addr: String,
    store: StoreKind,
    db_path: PathBuf,
    token_length: usize,
    debug: bool,
    log_dir: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(name = "lvl-hub")]
struct Args {
    #[arg(long, default_value = "")]
    addr: String,
    #[arg(long, default_value = "")]
    store: String,
    #[arg(long, default_value = "")]
    db_path: String,
    #[arg(long)]
    token_length: Option<usize>,
    #[arg(long, default_value_t = false)]
    debug: bool,
    #[arg(long, default_value = "")]
    log_dir: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_file = load_env_file(env_var("LVL_ENV_FILE").map(PathBuf::from).as_deref());
    let config = load_config(Args::parse(), &env_var)?;
    let _log_guard = init_logging(&config);
    if let Some(path) = &env_file {
        info!(event = "env_file_loaded", path = %path.display());
    }

    if let Err(err) = run(config).await {
        error!(event = "hub_error", error = %format!("{err:#}"));
        return Err(err);
    }
    Ok(())
}

async fn run(config: Config) -> anyhow::Result<()> {
    let addr: SocketAddr = config
        .addr
        .parse()
        .with_context(|| format!("invalid listen address {}", config.addr))?;

    let store = open_store(&config)?;
    let engine = LevelingEngine::new(store).with_token_len(config.token_length);
    let renderer = Renderer::new().context("compile templates")?;
    let app = routes::router(AppState {
        engine: Arc::new(engine),
        renderer: Arc::new(renderer),
    });

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;

    info!(
        event = "hub_start",
        addr = %addr,
        store = %config.store,
        db_path = %config.db_path.display()
    );

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!(event = "hub_stop");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("serve")
}

fn open_store(config: &Config) -> anyhow::Result<AnyStore> {
    match config.store {
        StoreKind::Memory => Ok(AnyStore::Memory(MemoryStore::new())),
        StoreKind::Sqlite => {
            if let Some(parent) = config.db_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("create {}", parent.display()))?;
                }
            }
            let store = SqliteStore::open(&config.db_path)
                .with_context(|| format!("open {}", config.db_path.display()))?;
            Ok(AnyStore::Sqlite(store))
        }
    }
}

fn load_config(args: Args, env: &dyn Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
    let addr = resolve_addr(&args.addr, env);
    let store = flag_or_env(&args.store, "LVL_STORE", env)
        .map(|value| value.parse::<StoreKind>().map_err(|err| anyhow!(err)))
        .transpose()?
        .unwrap_or(StoreKind::Sqlite);
    let db_path = flag_or_env(&args.db_path, "LVL_DB_PATH", env)
        .unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
    let token_length = match args.token_length {
        Some(value) => value,
        None => match env("LVL_TOKEN_LENGTH") {
            Some(value) => value
                .trim()
                .parse()
                .with_context(|| format!("LVL_TOKEN_LENGTH must be a number, got {value}"))?,
            None => DEFAULT_TOKEN_LEN,
        },
    };
    if !(MIN_GENERATED_TOKEN_LEN..=MAX_GENERATED_TOKEN_LEN).contains(&token_length) {
        bail!(
            "token length must be between {MIN_GENERATED_TOKEN_LEN} and {MAX_GENERATED_TOKEN_LEN}, got {token_length}"
        );
    }
    let debug = args.debug || env_true("LVL_DEBUG", env);
    let log_dir = flag_or_env(&args.log_dir, "LVL_LOG_DIR", env).map(PathBuf::from);

    Ok(Config {
        addr,
        store,
        db_path: PathBuf::from(db_path),
        token_length,
        debug,
        log_dir,
    })
}

/// Loads `KEY=value` pairs from `path`, or from the nearest `.env` when no path
/// is given. Variables already present in the process environment win.
fn load_env_file(path: Option<&Path>) -> Option<PathBuf> {
    match path {
        Some(path) => dotenv::from_path(path).ok().map(|_| path.to_path_buf()),
        None => dotenv::dotenv().ok(),
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn flag_or_env(flag: &str, key: &str, env: &dyn Fn(&str) -> Option<String>) -> Option<String> {
    if !flag.trim().is_empty() {
        return Some(flag.trim().to_string());
    }
    env(key)
}

fn env_true(key: &str, env: &dyn Fn(&str) -> Option<String>) -> bool {
    match env(key) {
        Some(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        None => false,
    }
}

fn resolve_addr(addr_flag: &str, env: &dyn Fn(&str) -> Option<String>) -> String {
    if let Some(addr) = flag_or_env(addr_flag, "LVL_ADDR", env) {
        return addr;
    }
    // a bare PORT binds every interface
    if let Some(port) = env("PORT") {
        return format!("0.0.0.0:{}", port.trim());
    }
    DEFAULT_ADDR.to_string()
}

fn init_logging(config: &Config) -> Option<LogGuard> {
    let level = if config.debug {
        "debug".to_string()
    } else if let Some(level) = env_var("LVL_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let writer = match config.log_dir.as_deref().map(open_log_file).transpose() {
        Ok(file) => LogGuard { file },
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    let file = writer.file.clone();
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(writer)
}

struct LogGuard {
    file: Option<Arc<Mutex<std::fs::File>>>,
}

/// Tees every log line to stdout and, when configured, the log file.
struct MultiWriter {
    stdout: io::Stdout,
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl MultiWriter {
    fn new(file: Option<Arc<Mutex<std::fs::File>>>) -> Self {
        Self {
            stdout: io::stdout(),
            file,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.stdout.write_all(buf);
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.stdout.flush();
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        Ok(())
    }
}

fn open_log_file(log_dir: &Path) -> io::Result<Arc<Mutex<std::fs::File>>> {
    std::fs::create_dir_all(log_dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(LOG_FILE_NAME))?;
    Ok(Arc::new(Mutex::new(file)))
}
