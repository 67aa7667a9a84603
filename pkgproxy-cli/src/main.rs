use std::sync::Mutex;
use std::time::Duration;

use clap::Parser;
use error::AppError;
use pkgproxy_engine::{ProxyAuth, ProxyConfig, ProxyType, Server, ServerConfig, UpstreamConfig};
use tracing::{Level, error, info, warn};
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod cli;
mod error;
mod utils;

use cli::CliArgs;
use utils::{format_bytes, parse_headers};

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        // Log the full error for debugging
        error!(error = ?e, "Application failed");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn bootstrap() -> Result<(), AppError> {
    // Parse command-line arguments
    let args = CliArgs::parse();

    init_logging(&args)?;

    info!("pkgproxy {} - caching proxy for package mirrors", env!("CARGO_PKG_VERSION"));
    info!("==================================================================");

    // Cache root, absolute so logged paths are unambiguous
    let root = match &args.root {
        Some(root) => root.clone(),
        None => std::env::current_dir()?,
    };
    let root = std::path::absolute(&root)?;

    info!(
        "HTTP timeout configuration: overall={}s, connect={}s, read={}s",
        args.timeout, args.connect_timeout, args.read_timeout
    );

    let upstream = upstream_config(&args)?;
    if let Some(base) = &upstream.upstream {
        info!(upstream = %base, "Origin-form requests go to the configured upstream");
    }

    let mut config = ServerConfig::new(&root, args.addr).with_upstream(upstream);
    if let Some(filters) = &args.filters {
        config = config.with_filters(filters);
    }

    let server = Server::bind(config).await?;
    let stats = server.stats();

    server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            info!("Shutting down");
        })
        .await?;

    let snapshot = stats.snapshot();
    info!(
        "Served {} from cache, {} from upstream",
        format_bytes(snapshot.cache_bytes),
        format_bytes(snapshot.upstream_bytes)
    );
    Ok(())
}

fn init_logging(args: &CliArgs) -> Result<(), AppError> {
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_ascii_lowercase()));

    let writer = match &args.log_file {
        Some(path) => {
            let log_file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            BoxMakeWriter::new(MakeWriterExt::and(std::io::stdout, Mutex::new(log_file)))
        }
        None => BoxMakeWriter::new(std::io::stdout),
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(args.log_file.is_none())
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AppError::Initialization(e.to_string()))
}

fn upstream_config(args: &CliArgs) -> Result<UpstreamConfig, AppError> {
    let mut builder = UpstreamConfig::builder()
        .with_timeout(Duration::from_secs(args.timeout))
        .with_connect_timeout(Duration::from_secs(args.connect_timeout))
        .with_read_timeout(Duration::from_secs(args.read_timeout))
        .with_follow_redirects(args.follow_redirects)
        .with_headers(parse_headers(&args.headers));

    if let Some(base) = &args.upstream {
        builder = builder.with_upstream(base)?;
    }

    // Handle proxy configuration
    if args.no_proxy {
        // No proxy flag overrides everything else
        info!("All proxy settings disabled (--no-proxy flag)");
        builder = builder.with_system_proxy(false);
    } else if let Some(proxy_url) = args.proxy.as_ref() {
        let proxy_type: ProxyType = args.proxy_type.parse()?;

        // Configure proxy authentication if both username and password are provided
        let auth = match (&args.proxy_user, &args.proxy_pass) {
            (Some(username), Some(password)) => Some(ProxyAuth {
                username: username.clone(),
                password: password.clone(),
            }),
            (None, None) => None,
            _ => {
                return Err(AppError::InvalidInput(
                    "--proxy-user and --proxy-pass must be given together".to_string(),
                ));
            }
        };

        info!(
            proxy_url = %proxy_url,
            proxy_type = ?proxy_type,
            has_auth = auth.is_some(),
            "Using explicit proxy configuration for upstream requests"
        );

        builder = builder.with_proxy(ProxyConfig {
            url: proxy_url.clone(),
            proxy_type,
            auth,
        });
    } else if args.use_system_proxy {
        info!("Using system proxy settings for upstream requests");
        builder = builder.with_system_proxy(true);
    }

    Ok(builder.build())
}
