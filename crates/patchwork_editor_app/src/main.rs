// SPDX-License-Identifier: MIT OR Apache-2.0
//! Patchwork Editor headless driver
//!
//! Loads a patch scene, routes its segmented connections, replays the
//! scene's clicks and drags against a simulated engine thread, and runs the
//! path update timer until every edit has reached the engine.
//!
//! ```text
//! patchwork_editor [scene.ron] [config.ron]
//! ```
//!
//! Without a scene the bundled demo is used. Set `RUST_LOG` to adjust
//! logging, e.g. `RUST_LOG=patchwork_editor_graph=debug`.

mod app;
mod scene;

use app::{Session, SessionError, SessionOptions};
use patchwork_editor_graph::{ConfigError, EditorConfig};
use scene::Scene;
use std::path::PathBuf;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
enum DriverError {
    #[error("config {}: {source}", path.display())]
    Config { path: PathBuf, source: ConfigError },

    #[error(transparent)]
    Session(#[from] SessionError),
}

fn run() -> Result<(), DriverError> {
    let mut args = std::env::args_os().skip(1).map(PathBuf::from);
    let scene_path = args.next();
    let config_path = args.next();

    let config = match config_path {
        Some(path) => {
            EditorConfig::load(&path).map_err(|source| DriverError::Config { path, source })?
        }
        None => EditorConfig::default(),
    };

    let scene = match &scene_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading scene");
            Scene::load(path).map_err(SessionError::from)?
        }
        None => app::demo_scene().map_err(SessionError::from)?,
    };

    let session = Session::new(scene, config, SessionOptions::default())?;
    let report = session.run()?;
    print!("{report}");
    Ok(())
}

fn main() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("patchwork_editor_app=info,patchwork_editor_graph=info")
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Patchwork Editor v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run() {
        tracing::error!("Driver failed: {e}");
        std::process::exit(1);
    }
}
