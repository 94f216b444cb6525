mod config;
mod handler;
mod ide;

use std::path::Path;
use std::sync::Arc;

use env_flags::env_flags;
use once_cell::sync::OnceCell;
use rust_mcp_sdk::error::SdkResult;
use rust_mcp_sdk::mcp_server::{ServerRuntime, server_runtime_core};
use rust_mcp_sdk::schema::{
    Implementation, InitializeResult, LATEST_PROTOCOL_VERSION, ServerCapabilities,
    ServerCapabilitiesTools, ToolListChangedNotification,
};
use rust_mcp_sdk::{McpServer, StdioTransport, TransportOptions};

use crate::config::{UserConfig, bridge_home, load_user_config, resolve_bridge_config};
use crate::handler::BridgeServerHandler;
use crate::ide::connection::ConnectionManager;

fn init_tracing(home: &Path, user_cfg: Option<&UserConfig>) {
    env_flags! {
        /// Tracing filter, e.g. "info", "debug", or targets format.
        RUST_LOG: &str = "info";
        /// Debug-level logging when no explicit filter is set.
        VERBOSE: bool = false;
        /// JSON formatting for logs
        TRACING_JSON: bool = false;
        /// If true, also log to file under <IDEBRIDGE_HOME>/logs or LOG_DIR
        LOG_TO_FILE: bool = true;
        /// Optional explicit log directory (absolute). Defaults to <IDEBRIDGE_HOME>/logs
        LOG_DIR: &str = "";
    }

    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, prelude::*};

    let logging = user_cfg.and_then(|c| c.logging.as_ref());
    let env_set = |k: &str| std::env::var_os(k).is_some();

    // Env wins, then the user config, then defaults.
    let mut filter_value = (*RUST_LOG).to_string();
    if !env_set("RUST_LOG") {
        if let Some(level) = logging.and_then(|c| c.level.as_ref()) {
            filter_value = level.clone();
        } else if *VERBOSE {
            filter_value = "debug".to_string();
        }
    }
    let mut tracing_json = *TRACING_JSON;
    if !env_set("TRACING_JSON")
        && let Some(v) = logging.and_then(|c| c.json)
    {
        tracing_json = v;
    }
    let mut log_to_file = *LOG_TO_FILE;
    if !env_set("LOG_TO_FILE")
        && let Some(v) = logging.and_then(|c| c.to_file)
    {
        log_to_file = v;
    }
    let log_dir = if !(*LOG_DIR).is_empty() {
        crate::config::expand_home(*LOG_DIR)
    } else if let Some(dir) = logging.and_then(|c| c.dir.as_ref()) {
        crate::config::expand_home(dir)
    } else {
        home.join("logs")
    };

    let filter = EnvFilter::try_new(filter_value).unwrap_or_else(|_| EnvFilter::new("info"));

    // Always write logs to stderr to avoid contaminating stdio JSON-RPC.
    let base = tracing_subscriber::fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_target(true)
        .with_ansi(true)
        .with_writer(std::io::stderr);

    static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();
    let file_writer = if log_to_file {
        match std::fs::create_dir_all(&log_dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::daily(log_dir, "idebridge-mcp.log");
                let (nb, guard) = tracing_appender::non_blocking(appender);
                let _ = FILE_GUARD.set(guard);
                Some(nb)
            }
            Err(e) => {
                eprintln!("failed to create log dir {}: {}", log_dir.display(), e);
                None
            }
        }
    } else {
        None
    };

    let reg = tracing_subscriber::registry().with(filter);
    let result = match (tracing_json, file_writer) {
        (true, Some(nb)) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_file(false)
                .with_line_number(false)
                .with_target(true)
                .with_ansi(false)
                .with_writer(nb)
                .json();
            reg.with(base.json()).with(file_layer).try_init()
        }
        (true, None) => reg.with(base.json()).try_init(),
        (false, Some(nb)) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_file(false)
                .with_line_number(false)
                .with_target(true)
                .with_ansi(false)
                .with_writer(nb)
                .compact();
            reg.with(base.compact()).with(file_layer).try_init()
        }
        (false, None) => reg.with(base.compact()).try_init(),
    };
    if let Err(e) = result {
        tracing::debug!("tracing already set: {:?}", e);
    }
}

#[tokio::main]
async fn main() -> SdkResult<()> {
    let home = bridge_home();
    let user_cfg = load_user_config(&home).ok().flatten();
    init_tracing(&home, user_cfg.as_ref());

    let config = resolve_bridge_config(user_cfg.as_ref());
    tracing::info!(
        "starting idebridge-mcp (ide={}, host={}, override_port={:?}, ports={}-{})",
        config.ide,
        config.host,
        config.override_port,
        config.port_range.start,
        config.port_range.end
    );

    // MCP initialize details and capabilities
    let server_details = InitializeResult {
        server_info: Implementation {
            name: "idebridge-mcp".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: Some("IDE Bridge MCP Server".to_string()),
        },
        capabilities: ServerCapabilities {
            tools: Some(ServerCapabilitiesTools {
                list_changed: Some(true),
            }),
            ..Default::default()
        },
        meta: None,
        instructions: None,
        protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
    };

    let poll_connected = config.poll_connected;
    let poll_disconnected = config.poll_disconnected;
    let connection = ConnectionManager::new(config);

    // Initial discovery before serving, so the first client request finds a
    // warm cache when the IDE is already up.
    connection.update_ide_endpoint().await;

    let handler = BridgeServerHandler::new(connection.clone());
    let transport = StdioTransport::new(TransportOptions::default())?;
    let server: Arc<ServerRuntime> = Arc::new(server_runtime_core::create_server(
        server_details,
        transport,
        handler,
    ));

    // Relay tool-list change signals from the discovery core to the client.
    let (notify_tx, mut notify_rx) = tokio::sync::mpsc::unbounded_channel::<()>();
    connection.set_notification_callback(move || {
        let _ = notify_tx.send(());
    });
    {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            while notify_rx.recv().await.is_some() {
                tracing::info!("sending tools/list_changed notification to client");
                let notification = ToolListChangedNotification::new(None);
                if let Err(e) = server.send_notification(notification.into()).await {
                    tracing::error!("failed to send tools changed notification: {e}");
                }
            }
        });
    }

    // Adaptive endpoint refresh: quick reconnection while disconnected, low
    // overhead once stable.
    {
        let connection = connection.clone();
        tokio::spawn(async move {
            loop {
                let interval = if connection.cached_endpoint().is_some() {
                    poll_connected
                } else {
                    poll_disconnected
                };
                tokio::time::sleep(interval).await;
                connection.update_ide_endpoint().await;
            }
        });
    }

    tracing::info!("starting stdio server");
    if let Err(e) = server.start().await {
        let msg = match e.rpc_error_message() {
            Some(m) => m.to_string(),
            None => e.to_string(),
        };
        tracing::error!("server runtime error: {}", msg);
    }
    tracing::info!("server stopped");
    Ok(())
}
