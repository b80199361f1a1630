// ============================================================
//  Tap Tempo — Mesure du tempo par frappes & métronome
//
//  Dépendances :
//    cpal      — lecture audio cross-platform
//    hound     — lecture du clic au format WAV
//    ratatui   — interface TUI
//    crossterm — terminal cross-platform
//    clap      — options de ligne de commande
//    log / env_logger — journal dans un fichier
// ============================================================

mod app;
mod audio;
mod click;
mod config;
mod metronome;
mod tempo;
mod ui;

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::OpenOptions;
use std::path::Path;

use app::App;
use config::Config;

fn main() -> Result<()> {
    let config = Config::parse();
    init_logging(&config.log_path())?;
    log::info!("démarrage : {:?}", config);
    App::run(config)
}

/// Le terminal est en écran alternatif : le journal part dans un fichier.
/// Fichier inaccessible : exécution sans journal.
fn init_logging(path: &Path) -> Result<()> {
    let file = match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("journal {} inaccessible ({}), exécution sans journal", path.display(), e);
            return Ok(());
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(file)))
        .try_init()
        .context("initialisation du journal")?;
    Ok(())
}
