#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::path::PathBuf;

use graph_relay::controller::Relay;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let relay = Relay::from_file(&find_config_file()?)?;

    relay.run().await
}

/// Find the configuration file using the following precedence:
/// 1. `GRAPH_RELAY_CONFIG` environment variable
/// 2. ./graph-relay.toml (current working directory)
/// 3. /etc/graph-relay/graph-relay.toml (system-wide config)
fn find_config_file() -> anyhow::Result<PathBuf> {
    if let Ok(env_path) = std::env::var("GRAPH_RELAY_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "GRAPH_RELAY_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    let default_paths = [
        PathBuf::from("./graph-relay.toml"),
        PathBuf::from("/etc/graph-relay/graph-relay.toml"),
    ];

    for path in &default_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - GRAPH_RELAY_CONFIG environment variable\n{paths_tried}"
    )
}
