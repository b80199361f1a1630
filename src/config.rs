// ============================================================
//  config.rs — Options de ligne de commande
// ============================================================

use clap::Parser;
use std::path::PathBuf;

pub const MIN_BPM: u32 = 30;
pub const MAX_BPM: u32 = 300;
pub const DEFAULT_BPM: u32 = 60;

#[derive(Debug, Clone, Parser)]
#[command(name = "tap-tempo", version, about = "Tap tempo et métronome en terminal")]
pub struct Config {
    /// Tempo initial (30 à 300 BPM)
    #[arg(long, default_value_t = DEFAULT_BPM,
          value_parser = clap::value_parser!(u32).range(MIN_BPM as i64..=MAX_BPM as i64))]
    pub bpm: u32,

    /// Démarrer avec le tempo ×2 activé
    #[arg(long)]
    pub double: bool,

    /// Fichier WAV à utiliser comme clic (clic intégré sinon)
    #[arg(long, value_name = "WAV")]
    pub click: Option<PathBuf>,

    /// Désactiver le métronome sans interroger la sortie audio
    #[arg(long)]
    pub no_audio: bool,

    /// Fichier de journal (l'écran du terminal est occupé par l'interface)
    #[arg(long, env = "TAP_TEMPO_LOG", value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

impl Config {
    pub fn log_path(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("tap-tempo.log"))
    }
}
