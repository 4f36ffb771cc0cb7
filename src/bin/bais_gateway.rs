use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use bais_gateway_lib::config::{GatewayConfig, DEFAULT_LISTEN_ADDR};
use bais_gateway_lib::gateway::{build_router, GatewayState};
use bais_gateway_lib::logging;
use tokio::net::TcpListener;
use tracing::info;

fn usage() -> String {
    format!(
        "USAGE:\n  bais-gateway [--config <file>] [--listen <addr>] [--static-dir <dir>]\n\n\
OPTIONS:\n  --config <file>      TOML settings file, applied before environment variables\n  --listen <addr>      Bind address (default: {DEFAULT_LISTEN_ADDR}, or PORT)\n  --static-dir <dir>   Serve site files from <dir> (or STATIC_DIR)\n  -h, --help           Show this help\n\n\
ENVIRONMENT:\n  TENANT_ID, CLIENT_ID, CLIENT_SECRET, SHAREPOINT_DRIVE_ID   drive access (required)\n  ADMIN_IPS            comma-separated admin allowlist\n  GATEWAY_FOLDERS      comma-separated folder labels for recent-file\n  CORS_ORIGINS         comma-separated allowed origins\n  SCHEDULE_CSV         zmanim schedule file\n  PORT                 listen port\n  RUST_LOG             log filter\n"
    )
}

fn parse_args() -> Result<GatewayConfig, String> {
    let mut config_path: Option<PathBuf> = None;
    let mut listen: Option<SocketAddr> = None;
    let mut static_dir: Option<PathBuf> = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                return Err(usage());
            }
            "--config" => {
                let value = args.next().ok_or("--config requires a value")?;
                config_path = Some(PathBuf::from(value));
            }
            "--listen" => {
                let value = args.next().ok_or("--listen requires a value")?;
                listen = Some(
                    value
                        .parse::<SocketAddr>()
                        .map_err(|error| format!("invalid listen address `{value}`: {error}"))?,
                );
            }
            "--static-dir" => {
                let value = args.next().ok_or("--static-dir requires a value")?;
                static_dir = Some(PathBuf::from(value));
            }
            other => {
                return Err(format!("unknown option: {other}"));
            }
        }
    }

    let base = match config_path {
        Some(path) => GatewayConfig::from_toml_file(&path)?,
        None => GatewayConfig::default(),
    };
    let mut config = base.from_environment()?;
    if let Some(listen) = listen {
        config.listen = listen;
    }
    if let Some(static_dir) = static_dir {
        config.static_dir = Some(static_dir);
    }

    config.validate()?;
    Ok(config)
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}

async fn run(config: GatewayConfig) -> Result<(), String> {
    let listen_addr = config.listen;
    let folders = config.folders.join(", ");
    let admin_count = config.admin_ips.len();
    let state = GatewayState::new(config)?;
    let app = build_router(state);

    let listener = TcpListener::bind(listen_addr)
        .await
        .map_err(|error| format!("failed to bind {listen_addr}: {error}"))?;

    info!(
        "bais-gateway listening on {} (folders: {}, admin ips: {})",
        listen_addr, folders, admin_count
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|error| format!("gateway server failed: {error}"))
}

fn main() {
    let usage_text = usage();
    let config = match parse_args() {
        Ok(config) => config,
        Err(error) => {
            let is_help = error == usage_text;
            eprintln!("{error}");
            if !is_help {
                eprintln!("\n{}", usage_text);
            }
            std::process::exit(if is_help { 0 } else { 2 });
        }
    };

    logging::init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("failed to build tokio runtime: {error}");
            std::process::exit(1);
        }
    };

    if let Err(error) = runtime.block_on(run(config)) {
        tracing::error!("{error}");
        std::process::exit(1);
    }
}
