//! Container lifecycle management: start, health checks, teardown.

use crate::config::{DbVersion, TestDbConfig};
use anyhow::{bail, Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;
use std::process::{Command, Output};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

const CONTAINER_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Path to this crate's docker-compose.yml.
pub fn docker_compose_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("docker")
        .join("docker-compose.yml")
}

pub fn is_docker_available() -> bool {
    Command::new("docker")
        .arg("info")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Run `docker compose` (v2), falling back to `docker-compose` (v1).
fn docker_compose_cmd(args: &[&str]) -> Result<Output> {
    let compose_file = docker_compose_path();

    if let Ok(out) = Command::new("docker")
        .args(["compose", "-f"])
        .arg(&compose_file)
        .args(args)
        .output()
    {
        if out.status.success() {
            return Ok(out);
        }
    }

    Command::new("docker-compose")
        .arg("-f")
        .arg(&compose_file)
        .args(args)
        .output()
        .context("Failed to run docker-compose")
}

pub fn is_container_running(version: DbVersion) -> bool {
    docker_compose_cmd(&["ps", "-q", version.service_name()])
        .map(|out| !out.stdout.is_empty())
        .unwrap_or(false)
}

pub fn start_container(version: DbVersion) -> Result<()> {
    let service = version.service_name();
    info!("Starting container: {}", service);

    let output = docker_compose_cmd(&["up", "-d", service])?;
    if !output.status.success() {
        bail!(
            "Failed to start container {}: {}",
            service,
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(())
}

/// Stop and remove every test container and volume.
pub fn stop_all_containers() -> Result<()> {
    info!("Stopping all test containers");
    let output = docker_compose_cmd(&["down", "-v"])?;
    if !output.status.success() {
        bail!(
            "Failed to stop containers: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(())
}

async fn postgres_ready(version: DbVersion) -> bool {
    let conn_str = TestDbConfig::new(version).postgres_connection_string();
    let connect = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(1))
        .connect(&conn_str);

    match timeout(Duration::from_secs(2), connect).await {
        Ok(Ok(pool)) => sqlx::query("SELECT 1").fetch_one(&pool).await.is_ok(),
        _ => false,
    }
}

/// Wait until the server accepts connections and answers a query.
pub async fn wait_for_healthy(version: DbVersion) -> Result<()> {
    let port = version.port();
    info!("Waiting for {} on port {}", version, port);

    let start = Instant::now();
    loop {
        let port_open = TcpStream::connect(("localhost", port)).await.is_ok();
        if port_open && postgres_ready(version).await {
            debug!("{} healthy after {:?}", version, start.elapsed());
            return Ok(());
        }

        if start.elapsed() > CONTAINER_STARTUP_TIMEOUT {
            bail!(
                "Timeout waiting for {} to be healthy after {:?}",
                version,
                CONTAINER_STARTUP_TIMEOUT
            );
        }
        sleep(HEALTH_CHECK_INTERVAL).await;
    }
}

/// Start the container if needed and wait for it.
pub async fn ensure_container_running(version: DbVersion) -> Result<()> {
    if !is_docker_available() {
        bail!("Docker is not available. Install Docker or set VITALFLOW_TEST_PG_URL.");
    }
    if !is_container_running(version) {
        start_container(version)?;
    }
    wait_for_healthy(version).await
}
