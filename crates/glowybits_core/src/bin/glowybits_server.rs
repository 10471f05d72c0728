/*
 * SPDX-FileCopyrightText: 2026 GlowyBits Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Result;
use glowybits_core::config::GlowyConfig;
use glowybits_core::server;
use std::path::PathBuf;
use tracing::info;

fn parse_config_path() -> Result<Option<PathBuf>> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return Ok(Some(PathBuf::from(path)));
            }
            return Err(anyhow::anyhow!("--config requires a path"));
        }
    }
    if let Ok(path) = std::env::var("GLOWYBITS_CONFIG") {
        if !path.trim().is_empty() {
            return Ok(Some(PathBuf::from(path)));
        }
    }
    Ok(None)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap()),
        )
        .init();

    let cfg_path = parse_config_path()?;
    if let Some(path) = &cfg_path {
        info!("config: {}", path.display());
    }
    let cfg = GlowyConfig::load(cfg_path.as_deref())?;
    info!(
        db = %cfg.db_path.display(),
        media = %cfg.media.backend,
        "glowybits server starting"
    );

    server::serve(cfg, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested");
    })
    .await
}
