use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;
use tracing_subscriber::EnvFilter;

use innkeep::notify::{LogNotifier, RetryPolicy};
use innkeep::tenant::TenantManager;
use innkeep::wire;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler unavailable ({e}), waiting for ctrl-c only");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let metrics_port: Option<u16> = std::env::var("INNKEEP_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    innkeep::observability::init(metrics_port);

    let port = std::env::var("INNKEEP_PORT").unwrap_or_else(|_| "5433".into());
    let bind = std::env::var("INNKEEP_BIND").unwrap_or_else(|_| "0.0.0.0".into());
    let data_dir = std::env::var("INNKEEP_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let password = std::env::var("INNKEEP_PASSWORD").unwrap_or_else(|_| "innkeep".into());
    let max_connections: usize = env_or("INNKEEP_MAX_CONNECTIONS", 256);
    let compact_threshold: u64 = env_or("INNKEEP_COMPACT_THRESHOLD", 1000);
    let image_dir = std::env::var("INNKEEP_IMAGE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(&data_dir).join("images"));
    let retry = RetryPolicy {
        max_attempts: env_or("INNKEEP_NOTIFY_ATTEMPTS", RetryPolicy::default().max_attempts),
        ..RetryPolicy::default()
    };

    let tls_cert = std::env::var("INNKEEP_TLS_CERT").ok();
    let tls_key = std::env::var("INNKEEP_TLS_KEY").ok();
    let tls_acceptor = innkeep::tls::load_tls_acceptor(tls_cert.as_deref(), tls_key.as_deref())?;

    std::fs::create_dir_all(&data_dir)?;
    std::fs::create_dir_all(&image_dir)?;

    let tenant_manager = Arc::new(
        TenantManager::new(PathBuf::from(&data_dir), compact_threshold)
            .with_image_dir(image_dir.clone())
            .with_notifier(Arc::new(LogNotifier), retry),
    );

    // First-start bootstrap of a staff account on the default property.
    if let (Ok(user), Ok(admin_password)) = (
        std::env::var("INNKEEP_ADMIN_USER"),
        std::env::var("INNKEEP_ADMIN_PASSWORD"),
    ) {
        let engine = tenant_manager.get_or_create("default")?;
        if engine.ensure_admin(&user, &admin_password).await? {
            info!("created admin account {user}");
        }
    }

    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("innkeep listening on {addr}");
    info!("  data_dir: {data_dir}");
    info!("  image_dir: {}", image_dir.display());
    info!("  max_connections: {max_connections}");
    info!("  tls: {}", if tls_acceptor.is_some() { "enabled" } else { "disabled" });
    info!("  metrics: {}", metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // Stop accepting on SIGTERM/ctrl-c, then drain in-flight connections.
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(innkeep::observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(innkeep::observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(innkeep::observability::CONNECTIONS_ACTIVE).increment(1.0);
                let tm = tenant_manager.clone();
                let pw = password.clone();
                let tls = tls_acceptor.clone();

                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = wire::process_connection(socket, tm, pw, tls).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(innkeep::observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }

    info!("innkeep stopped");
    Ok(())
}
