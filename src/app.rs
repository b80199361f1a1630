// ============================================================
//  app.rs — Machine d'état de l'application
//
//  Deux modes exclusifs :
//    Mesure (frappes) ↔ Métronome
//  La mesure s'arrête d'elle-même une fois le tempo stabilisé.
// ============================================================

use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::{
    io,
    time::{Duration, Instant},
};

use crate::{
    audio::CpalClickOutput,
    click::{ClickSample, DEFAULT_SAMPLE_RATE},
    config::{Config, MAX_BPM, MIN_BPM},
    metronome::{self, Metronome, MetronomeEvent},
    tempo::{TapOutcome, TapTempo},
    ui,
};

// ─── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum AudioStatus {
    /// Nom de la sortie audio utilisée.
    Ready(String),
    Unavailable(String),
}

pub struct AppState {
    pub measuring: bool,
    pub tempo: TapTempo,
    pub bpm: u32,
    pub double: bool,

    pub metronome: Option<Metronome>,
    pub audio: AudioStatus,

    pub last_outcome: Option<TapOutcome>,
    pub last_tap: Option<Instant>,
    pub last_click: Option<Instant>,
    pub notice: Option<String>,
}

impl AppState {
    pub fn new(config: &Config, metronome: Option<Metronome>, audio: AudioStatus) -> Self {
        let mut tempo = TapTempo::new();
        tempo.set_double_tempo(config.double);
        AppState {
            measuring: false,
            tempo,
            bpm: config.bpm.clamp(MIN_BPM, MAX_BPM),
            double: config.double,
            metronome,
            audio,
            last_outcome: None,
            last_tap: None,
            last_click: None,
            notice: None,
        }
    }

    pub fn metronome_available(&self) -> bool {
        self.metronome.is_some()
    }

    pub fn metronome_running(&self) -> bool {
        self.metronome.as_ref().map_or(false, Metronome::is_running)
    }

    // ─── Mesure ──────────────────────────────────────────────────────────────

    /// Entrer en mesure coupe le métronome ; en sortir efface les frappes.
    pub fn toggle_measuring(&mut self) {
        if self.measuring {
            self.stop_measuring();
            return;
        }
        if let Some(m) = self.metronome.as_mut() {
            if m.is_running() {
                m.stop();
            }
        }
        self.tempo.reset();
        self.measuring = true;
        self.last_outcome = None;
        self.notice = None;
        log::info!("mesure démarrée");
    }

    fn stop_measuring(&mut self) {
        self.measuring = false;
        self.tempo.reset();
        log::info!("mesure arrêtée ({} BPM)", self.bpm);
    }

    pub fn beat(&mut self, now: Instant) {
        if !self.measuring {
            return;
        }
        self.last_tap = Some(now);
        let outcome = self.tempo.record_tap(now);
        self.last_outcome = Some(outcome);

        match outcome {
            TapOutcome::Estimate { bpm, stabilized } => {
                self.set_bpm(bpm);
                if stabilized {
                    log::info!("tempo stabilisé à {} BPM", self.bpm);
                    self.notice = Some(format!("Tempo stabilisé à {} BPM", self.bpm));
                    self.stop_measuring();
                }
            }
            TapOutcome::Ignored => log::debug!("frappe ignorée (rebond)"),
            TapOutcome::WarmUp { .. } => {}
        }
    }

    // ─── Tempo affiché ───────────────────────────────────────────────────────

    /// Borne à 30–300 BPM et répercute sur le métronome s'il tourne.
    pub fn set_bpm(&mut self, bpm: u32) {
        self.bpm = bpm.clamp(MIN_BPM, MAX_BPM);
        let interval = metronome::interval_for_bpm(self.bpm);
        let result = match self.metronome.as_mut() {
            Some(m) if m.is_running() => m.set_interval(interval),
            _ => Ok(()),
        };
        if let Err(e) = result {
            self.disable_metronome(e.to_string());
        }
    }

    pub fn adjust_bpm(&mut self, delta: i32) {
        let bpm = (self.bpm as i64 + delta as i64).max(0) as u32;
        self.set_bpm(bpm);
    }

    /// ×2 double la valeur affichée une fois ; l'inverse la divise (entier).
    pub fn toggle_double(&mut self) {
        self.double = !self.double;
        self.tempo.set_double_tempo(self.double);
        let bpm = if self.double { self.bpm * 2 } else { self.bpm / 2 };
        self.set_bpm(bpm);
    }

    // ─── Métronome ───────────────────────────────────────────────────────────

    pub fn toggle_metronome(&mut self) {
        if self.measuring {
            return;
        }
        let interval = metronome::interval_for_bpm(self.bpm);
        let result = match self.metronome.as_mut() {
            Some(m) if m.is_running() => {
                m.stop();
                Ok(())
            }
            Some(m) => m.start(interval),
            None => return,
        };
        if let Err(e) = result {
            self.disable_metronome(e.to_string());
        }
    }

    /// Dépile les messages du thread métronome.
    pub fn poll_metronome(&mut self) {
        let mut failure = None;
        if let Some(m) = self.metronome.as_mut() {
            while let Some(event) = m.try_event() {
                match event {
                    MetronomeEvent::Click { at } => self.last_click = Some(at),
                    MetronomeEvent::Stopped { .. } => {}
                    MetronomeEvent::Failed(reason) => failure = Some(reason),
                }
            }
        }
        if let Some(reason) = failure {
            self.disable_metronome(reason);
        }
    }

    /// Désactive le métronome pour le reste de la session.
    fn disable_metronome(&mut self, reason: String) {
        if let Some(mut m) = self.metronome.take() {
            m.close();
        }
        log::warn!("métronome désactivé : {}", reason);
        self.notice = Some(format!("Métronome désactivé : {}", reason));
        self.audio = AudioStatus::Unavailable(reason);
    }

    pub fn shutdown(&mut self) {
        if let Some(m) = self.metronome.as_mut() {
            m.close();
        }
    }
}

// ─── Ouverture de l'audio ─────────────────────────────────────────────────────

fn open_metronome(config: &Config) -> (Option<Metronome>, AudioStatus) {
    if config.no_audio {
        log::info!("audio désactivé par --no-audio");
        return (None, AudioStatus::Unavailable("désactivé (--no-audio)".into()));
    }
    match try_open_metronome(config) {
        Ok((m, device)) => (Some(m), AudioStatus::Ready(device)),
        Err(e) => {
            log::warn!("métronome indisponible : {:#}", e);
            (None, AudioStatus::Unavailable(format!("{:#}", e)))
        }
    }
}

fn try_open_metronome(config: &Config) -> Result<(Metronome, String)> {
    let sample = match &config.click {
        Some(path) => ClickSample::from_wav(path)
            .with_context(|| format!("clic {}", path.display()))?,
        None => ClickSample::synthesize(DEFAULT_SAMPLE_RATE),
    };
    let output = CpalClickOutput::open(&sample)?;
    let device = output.device_name().to_string();
    let metronome = Metronome::spawn(output)?;
    Ok((metronome, device))
}

// ─── Point d'entrée ───────────────────────────────────────────────────────────

pub struct App;

impl App {
    pub fn run(config: Config) -> Result<()> {
        let (metronome, audio) = open_metronome(&config);
        let mut state = AppState::new(&config, metronome, audio);

        // Init terminal
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = Self::event_loop(&mut terminal, &mut state);
        state.shutdown();

        // Restaure le terminal
        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;
        result
    }

    fn event_loop(
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
        state: &mut AppState,
    ) -> Result<()> {
        let tick = Duration::from_millis(20);

        loop {
            state.poll_metronome();
            terminal.draw(|f| ui::draw(f, &*state))?;

            if !event::poll(tick)? {
                continue;
            }
            let Event::Key(key) = event::read()? else {
                continue;
            };
            if key.kind != KeyEventKind::Press {
                continue;
            }
            // Horodatage au plus près de la frappe
            let now = Instant::now();

            match (key.code, key.modifiers) {
                // Quitter
                (KeyCode::Char('q'), _) | (KeyCode::Char('c'), KeyModifiers::CONTROL) => break,

                // Frappe
                (KeyCode::Char(' ') | KeyCode::Enter | KeyCode::Char('b'), _) => state.beat(now),

                // Mesure on/off
                (KeyCode::Char('m') | KeyCode::Char('M'), _) => state.toggle_measuring(),

                // Tempo ×2
                (KeyCode::Char('x') | KeyCode::Char('X'), _) => state.toggle_double(),

                // Métronome on/off
                (KeyCode::Char('t') | KeyCode::Char('T'), _) => state.toggle_metronome(),

                // Réglage du tempo
                (KeyCode::Up | KeyCode::Char('+') | KeyCode::Char('='), _) => state.adjust_bpm(1),
                (KeyCode::Down | KeyCode::Char('-'), _) => state.adjust_bpm(-1),
                (KeyCode::PageUp, _) => state.adjust_bpm(10),
                (KeyCode::PageDown, _) => state.adjust_bpm(-10),

                _ => {}
            }
        }
        Ok(())
    }
}
