// ============================================================
//  metronome.rs — Ordonnanceur du clic
//
//  Un thread dédié joue le clic à intervalle régulier.
//  Chaque échéance est calculée depuis l'origine de la séance
//  (origine + k × intervalle) : les erreurs d'endormissement
//  ne s'accumulent pas.
//
//  Le thread principal pilote le métronome par messages
//  (Start / SetInterval / Stop / Shutdown) ; le thread renvoie
//  Click / Stopped / Failed.
// ============================================================

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::audio::ClickOutput;

/// Granularité d'attente du thread : borne la latence d'arrêt.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Intervalle maximal accepté (1 BPM).
pub const MAX_INTERVAL: Duration = Duration::from_secs(60);

// ─── Horloge ──────────────────────────────────────────────────────────────────

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

// ─── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum MetronomeError {
    #[error("intervalle invalide : {0:?}")]
    InvalidInterval(Duration),
    #[error("le thread du métronome s'est arrêté")]
    WorkerGone,
    #[error("impossible de lancer le thread du métronome : {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy)]
enum Command {
    Start(Duration),
    SetInterval(Duration),
    Stop,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetronomeEvent {
    Click { at: Instant },
    /// Le clic en cours est terminé et ses ressources libérées.
    Stopped { at: Instant },
    Failed(String),
}

/// Intervalle entre deux clics pour un tempo donné.
pub fn interval_for_bpm(bpm: u32) -> Duration {
    Duration::from_secs_f64(60.0 / bpm.max(1) as f64)
}

/// Plus petite échéance `origin + k × interval` strictement postérieure à `now`.
pub fn next_tick(origin: Instant, now: Instant, interval: Duration) -> Instant {
    let interval_ns = interval.as_nanos().max(1);
    let phase_ns = now.saturating_duration_since(origin).as_nanos() % interval_ns;
    now + Duration::from_nanos((interval_ns - phase_ns) as u64)
}

// ─── Poignée côté interface ───────────────────────────────────────────────────

pub struct Metronome {
    commands: Sender<Command>,
    events: Receiver<MetronomeEvent>,
    worker: Option<JoinHandle<()>>,
    running: bool,
    interval: Duration,
}

impl Metronome {
    pub fn spawn<O: ClickOutput>(output: O) -> Result<Self, MetronomeError> {
        Self::with_clock(output, Arc::new(MonotonicClock))
    }

    pub fn with_clock<O: ClickOutput>(output: O, clock: Arc<dyn Clock>) -> Result<Self, MetronomeError> {
        let (cmd_tx, cmd_rx) = unbounded();
        let (evt_tx, evt_rx) = unbounded();

        let worker = Worker {
            output: Box::new(output),
            clock,
            commands: cmd_rx,
            events: evt_tx,
            interval: interval_for_bpm(60),
            origin: None,
        };
        let handle = thread::Builder::new()
            .name("metronome".into())
            .spawn(move || worker.run())?;

        Ok(Metronome {
            commands: cmd_tx,
            events: evt_rx,
            worker: Some(handle),
            running: false,
            interval: interval_for_bpm(60),
        })
    }

    /// Démarre, ou redémarre la référence de phase si déjà lancé.
    pub fn start(&mut self, interval: Duration) -> Result<(), MetronomeError> {
        check_interval(interval)?;
        self.send(Command::Start(interval))?;
        self.interval = interval;
        self.running = true;
        Ok(())
    }

    /// Change l'intervalle sans toucher à l'origine de la séance.
    pub fn set_interval(&mut self, interval: Duration) -> Result<(), MetronomeError> {
        check_interval(interval)?;
        self.send(Command::SetInterval(interval))?;
        self.interval = interval;
        Ok(())
    }

    pub fn stop(&mut self) {
        if self.send(Command::Stop).is_err() {
            log::debug!("arrêt demandé mais le thread du métronome est déjà terminé");
        }
        self.running = false;
    }

    /// Arrête le métronome, attend la fin du thread et libère la sortie audio.
    pub fn close(&mut self) {
        self.running = false;
        let _ = self.commands.send(Command::Shutdown);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::warn!("le thread du métronome a paniqué");
            }
        }
    }

    /// Dépile un événement du thread, sans bloquer.
    pub fn try_event(&mut self) -> Option<MetronomeEvent> {
        let event = self.events.try_recv().ok()?;
        if matches!(event, MetronomeEvent::Failed(_)) {
            self.running = false;
        }
        Some(event)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn send(&self, command: Command) -> Result<(), MetronomeError> {
        self.commands.send(command).map_err(|_| MetronomeError::WorkerGone)
    }
}

impl Drop for Metronome {
    fn drop(&mut self) {
        self.close();
    }
}

fn check_interval(interval: Duration) -> Result<(), MetronomeError> {
    if interval.is_zero() || interval > MAX_INTERVAL {
        return Err(MetronomeError::InvalidInterval(interval));
    }
    Ok(())
}

// ─── Thread du métronome ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum Flow {
    Continue,
    /// Nouvel intervalle : l'échéance est recalculée depuis l'origine.
    Rephase,
    /// Start reçu : nouvelle origine, clic immédiat.
    Restart,
    Exit,
}

struct Worker {
    output: Box<dyn ClickOutput>,
    clock: Arc<dyn Clock>,
    commands: Receiver<Command>,
    events: Sender<MetronomeEvent>,
    interval: Duration,
    // Origine de la séance ; None = arrêté
    origin: Option<Instant>,
}

impl Worker {
    fn run(mut self) {
        loop {
            let flow = if self.origin.is_some() {
                self.tick()
            } else {
                match self.commands.recv() {
                    Ok(command) => self.apply(command),
                    Err(_) => Flow::Exit,
                }
            };
            if flow == Flow::Exit {
                break;
            }
        }
        log::debug!("thread du métronome terminé");
    }

    fn apply(&mut self, command: Command) -> Flow {
        match command {
            Command::Start(interval) => {
                self.interval = interval;
                self.origin = Some(self.clock.now());
                log::info!("métronome démarré ({:.3} s)", interval.as_secs_f64());
                Flow::Restart
            }
            Command::SetInterval(interval) => {
                self.interval = interval;
                log::debug!("intervalle du métronome : {:.3} s", interval.as_secs_f64());
                Flow::Rephase
            }
            Command::Stop => {
                if self.origin.take().is_some() {
                    log::info!("métronome arrêté");
                }
                Flow::Continue
            }
            Command::Shutdown => {
                self.origin = None;
                Flow::Exit
            }
        }
    }

    /// Attend au plus `timeout`, en traitant la commande reçue le cas échéant.
    fn wait(&mut self, timeout: Duration) -> Flow {
        match self.commands.recv_timeout(timeout) {
            Ok(command) => self.apply(command),
            Err(RecvTimeoutError::Timeout) => Flow::Continue,
            Err(RecvTimeoutError::Disconnected) => Flow::Exit,
        }
    }

    fn emit(&self, event: MetronomeEvent) {
        let _ = self.events.send(event);
    }

    fn tick(&mut self) -> Flow {
        // ── Lecture du clic ─────────────────────────────────────────────────
        let playback = match self.output.play() {
            Ok(p) => p,
            Err(e) => {
                log::warn!("clic impossible, métronome désactivé : {}", e);
                self.origin = None;
                self.emit(MetronomeEvent::Failed(e.to_string()));
                return Flow::Continue;
            }
        };
        let clicked = self.clock.now();
        self.emit(MetronomeEvent::Click { at: clicked });
        log::trace!("clic");

        // Fin observée du clic : un sample plus long que l'intervalle
        // reporte le clic suivant à la prochaine échéance de la grille.
        let mut ended = clicked;
        while self.origin.is_some() && !playback.is_finished() {
            match self.wait(POLL_INTERVAL) {
                Flow::Continue | Flow::Rephase => {}
                flow => {
                    drop(playback);
                    self.emit_stopped_if_idle();
                    return flow;
                }
            }
            ended = self.clock.now();
        }
        drop(playback);

        // ── Attente de la prochaine échéance ────────────────────────────────
        let mut next = match self.origin {
            Some(origin) => next_tick(origin, ended, self.interval),
            None => {
                self.emit_stopped_if_idle();
                return Flow::Continue;
            }
        };

        loop {
            let now = self.clock.now();
            if now >= next {
                return Flow::Continue;
            }
            let delta = next - now;
            let timeout = if delta >= POLL_INTERVAL {
                (delta / 2).min(POLL_INTERVAL)
            } else {
                delta
            };

            match self.wait(timeout) {
                Flow::Continue => {}
                Flow::Rephase => {
                    if let Some(origin) = self.origin {
                        next = next_tick(origin, self.clock.now(), self.interval);
                    }
                }
                flow => {
                    self.emit_stopped_if_idle();
                    return flow;
                }
            }
            if self.origin.is_none() {
                self.emit_stopped_if_idle();
                return Flow::Continue;
            }
        }
    }

    fn emit_stopped_if_idle(&self) {
        if self.origin.is_none() {
            self.emit(MetronomeEvent::Stopped { at: self.clock.now() });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioError, ClickPlayback};
    use std::sync::Mutex;

    // ─── Doublures ────────────────────────────────────────────────────────────

    struct ManualClock {
        now: Mutex<Instant>,
    }

    impl ManualClock {
        fn new(start: Instant) -> Arc<Self> {
            Arc::new(ManualClock { now: Mutex::new(start) })
        }

        fn set(&self, at: Instant) {
            *self.now.lock().unwrap() = at;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.now.lock().unwrap()
        }
    }

    /// Clic qui se termine immédiatement.
    struct InstantClick;

    struct Finished;

    impl ClickPlayback for Finished {
        fn is_finished(&self) -> bool {
            true
        }
    }

    impl ClickOutput for InstantClick {
        fn play(&mut self) -> Result<Box<dyn ClickPlayback>, AudioError> {
            Ok(Box::new(Finished))
        }
    }

    /// Clic qui ne se termine jamais : seul l'arrêt le libère.
    struct HeldClick {
        releases: Sender<Instant>,
    }

    struct Held {
        releases: Sender<Instant>,
    }

    impl ClickPlayback for Held {
        fn is_finished(&self) -> bool {
            false
        }
    }

    impl Drop for Held {
        fn drop(&mut self) {
            let _ = self.releases.send(Instant::now());
        }
    }

    impl ClickOutput for HeldClick {
        fn play(&mut self) -> Result<Box<dyn ClickPlayback>, AudioError> {
            Ok(Box::new(Held { releases: self.releases.clone() }))
        }
    }

    /// Clic qui dure `length` sur l'horloge manuelle.
    struct LongClick {
        clock: Arc<ManualClock>,
        length: Duration,
    }

    struct Until {
        clock: Arc<ManualClock>,
        end: Instant,
    }

    impl ClickPlayback for Until {
        fn is_finished(&self) -> bool {
            self.clock.now() >= self.end
        }
    }

    impl ClickOutput for LongClick {
        fn play(&mut self) -> Result<Box<dyn ClickPlayback>, AudioError> {
            Ok(Box::new(Until {
                clock: self.clock.clone(),
                end: self.clock.now() + self.length,
            }))
        }
    }

    struct FailingClick;

    impl ClickOutput for FailingClick {
        fn play(&mut self) -> Result<Box<dyn ClickPlayback>, AudioError> {
            Err(AudioError::NoOutputDevice)
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn next_event(metronome: &mut Metronome) -> MetronomeEvent {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if let Some(event) = metronome.try_event() {
                return event;
            }
            thread::sleep(ms(2));
        }
        panic!("aucun événement du métronome");
    }

    fn assert_quiet(metronome: &mut Metronome, for_how_long: Duration) {
        thread::sleep(for_how_long);
        assert_eq!(metronome.try_event(), None);
    }

    // ─── Calcul de phase ──────────────────────────────────────────────────────

    #[test]
    fn next_tick_is_aligned_on_origin() {
        let t0 = Instant::now();
        assert_eq!(next_tick(t0, t0 + ms(600), ms(250)), t0 + ms(750));
        assert_eq!(next_tick(t0, t0 + ms(500), ms(250)), t0 + ms(750));
        assert_eq!(next_tick(t0, t0, ms(500)), t0 + ms(500));
        assert_eq!(next_tick(t0, t0 + ms(1_234), ms(500)), t0 + ms(1_500));
    }

    #[test]
    fn bpm_to_interval() {
        assert_eq!(interval_for_bpm(60), Duration::from_secs(1));
        assert_eq!(interval_for_bpm(120), ms(500));
        assert_eq!(interval_for_bpm(300), ms(200));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut metronome = Metronome::spawn(InstantClick).unwrap();
        assert!(matches!(
            metronome.start(Duration::ZERO),
            Err(MetronomeError::InvalidInterval(_))
        ));
        assert!(metronome.set_interval(Duration::ZERO).is_err());
        assert!(!metronome.is_running());
    }

    #[test]
    fn oversized_interval_is_rejected() {
        let mut metronome = Metronome::spawn(InstantClick).unwrap();
        assert!(matches!(
            metronome.start(Duration::MAX),
            Err(MetronomeError::InvalidInterval(_))
        ));
        assert!(metronome.start(MAX_INTERVAL + ms(1)).is_err());
        assert!(!metronome.is_running());

        metronome.start(MAX_INTERVAL).unwrap();
        assert!(matches!(next_event(&mut metronome), MetronomeEvent::Click { .. }));
        assert!(metronome.set_interval(Duration::from_secs(u64::MAX)).is_err());
        assert_eq!(metronome.interval(), MAX_INTERVAL);
    }

    // ─── Ordonnancement (horloge manuelle) ────────────────────────────────────

    #[test]
    fn clicks_stay_on_the_grid_after_interval_change() {
        let t0 = Instant::now();
        let clock = ManualClock::new(t0);
        let mut metronome = Metronome::with_clock(InstantClick, clock.clone()).unwrap();

        metronome.start(ms(500)).unwrap();
        assert_eq!(next_event(&mut metronome), MetronomeEvent::Click { at: t0 });

        clock.set(t0 + ms(500));
        assert_eq!(next_event(&mut metronome), MetronomeEvent::Click { at: t0 + ms(500) });

        clock.set(t0 + ms(600));
        metronome.set_interval(ms(250)).unwrap();
        assert_quiet(&mut metronome, ms(150));

        // t0 + 0.75 s, pas t0 + 0.6 + 0.25 s
        clock.set(t0 + ms(700));
        assert_quiet(&mut metronome, ms(150));
        clock.set(t0 + ms(750));
        assert_eq!(next_event(&mut metronome), MetronomeEvent::Click { at: t0 + ms(750) });
    }

    #[test]
    fn late_click_does_not_shift_the_phase() {
        let t0 = Instant::now();
        let clock = ManualClock::new(t0);
        let mut metronome = Metronome::with_clock(InstantClick, clock.clone()).unwrap();

        metronome.start(ms(500)).unwrap();
        assert_eq!(next_event(&mut metronome), MetronomeEvent::Click { at: t0 });

        clock.set(t0 + ms(700));
        assert_eq!(next_event(&mut metronome), MetronomeEvent::Click { at: t0 + ms(700) });

        clock.set(t0 + ms(950));
        assert_quiet(&mut metronome, ms(150));
        clock.set(t0 + ms(1_000));
        assert_eq!(next_event(&mut metronome), MetronomeEvent::Click { at: t0 + ms(1_000) });
    }

    #[test]
    fn click_longer_than_interval_waits_for_the_next_grid_point() {
        let t0 = Instant::now();
        let clock = ManualClock::new(t0);
        let output = LongClick { clock: clock.clone(), length: ms(600) };
        let mut metronome = Metronome::with_clock(output, clock.clone()).unwrap();

        metronome.start(ms(500)).unwrap();
        assert_eq!(next_event(&mut metronome), MetronomeEvent::Click { at: t0 });

        // Le clic joue encore à t0 + 0.5 s : l'échéance est sautée
        clock.set(t0 + ms(500));
        assert_quiet(&mut metronome, ms(150));
        clock.set(t0 + ms(600));
        assert_quiet(&mut metronome, ms(150));

        clock.set(t0 + ms(1_000));
        assert_eq!(next_event(&mut metronome), MetronomeEvent::Click { at: t0 + ms(1_000) });
    }

    #[test]
    fn start_while_running_resets_the_origin() {
        let t0 = Instant::now();
        let clock = ManualClock::new(t0);
        let mut metronome = Metronome::with_clock(InstantClick, clock.clone()).unwrap();

        metronome.start(ms(500)).unwrap();
        assert_eq!(next_event(&mut metronome), MetronomeEvent::Click { at: t0 });

        clock.set(t0 + ms(200));
        metronome.start(ms(500)).unwrap();
        assert_eq!(next_event(&mut metronome), MetronomeEvent::Click { at: t0 + ms(200) });

        clock.set(t0 + ms(500));
        assert_quiet(&mut metronome, ms(150));
        clock.set(t0 + ms(700));
        assert_eq!(next_event(&mut metronome), MetronomeEvent::Click { at: t0 + ms(700) });
    }

    // ─── Arrêt (horloge réelle) ───────────────────────────────────────────────

    #[test]
    fn stop_while_waiting_is_observed_within_poll_interval() {
        let mut metronome = Metronome::spawn(InstantClick).unwrap();
        metronome.start(Duration::from_secs(1)).unwrap();
        assert!(matches!(next_event(&mut metronome), MetronomeEvent::Click { .. }));

        thread::sleep(ms(100));
        let asked = Instant::now();
        metronome.stop();
        assert!(!metronome.is_running());

        match next_event(&mut metronome) {
            MetronomeEvent::Stopped { at } => assert!(at.duration_since(asked) <= POLL_INTERVAL),
            other => panic!("événement inattendu : {:?}", other),
        }
        assert_quiet(&mut metronome, ms(100));
    }

    #[test]
    fn stop_during_playback_releases_the_stream() {
        let (tx, releases) = unbounded();
        let mut metronome = Metronome::spawn(HeldClick { releases: tx }).unwrap();
        metronome.start(Duration::from_secs(1)).unwrap();
        assert!(matches!(next_event(&mut metronome), MetronomeEvent::Click { .. }));

        thread::sleep(ms(120));
        assert!(releases.try_recv().is_err());

        let asked = Instant::now();
        metronome.stop();
        let released = releases.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(released.duration_since(asked) <= POLL_INTERVAL);
        assert!(matches!(next_event(&mut metronome), MetronomeEvent::Stopped { .. }));
    }

    #[test]
    fn close_releases_audio_and_ends_the_worker() {
        let (tx, releases) = unbounded();
        let mut metronome = Metronome::spawn(HeldClick { releases: tx }).unwrap();
        metronome.start(ms(500)).unwrap();
        assert!(matches!(next_event(&mut metronome), MetronomeEvent::Click { .. }));

        metronome.close();
        assert!(releases.try_recv().is_ok());
        assert!(matches!(
            metronome.start(ms(500)),
            Err(MetronomeError::WorkerGone)
        ));
    }

    #[test]
    fn playback_failure_stops_the_metronome() {
        let mut metronome = Metronome::spawn(FailingClick).unwrap();
        metronome.start(ms(500)).unwrap();
        assert!(metronome.is_running());

        match next_event(&mut metronome) {
            MetronomeEvent::Failed(reason) => assert!(reason.contains("sortie audio")),
            other => panic!("événement inattendu : {:?}", other),
        }
        assert!(!metronome.is_running());
        assert_quiet(&mut metronome, ms(100));
    }
}
