// ============================================================
//  tempo.rs — Estimation du tempo par frappes (tap tempo)
//
//  - Les 5 premières frappes servent d'échauffement
//  - Moyenne glissante sur les 20 derniers intervalles
//  - Détection de stabilisation (estimations identiques)
// ============================================================

use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const HISTORY_CAPACITY: usize = 20;
pub const WARM_UP_TAPS: u32 = 5;
pub const STABLE_THRESHOLD: u32 = 5;

/// Intervalle minimal entre deux frappes retenues (≈ 600 BPM).
/// En dessous, la frappe est considérée comme un rebond et ignorée.
pub const MIN_TAP_INTERVAL: Duration = Duration::from_millis(100);

// ─── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapOutcome {
    /// Frappe d'échauffement, aucune estimation.
    WarmUp { remaining: u32 },
    /// Frappe trop rapprochée de la précédente.
    Ignored,
    Estimate { bpm: u32, stabilized: bool },
}

#[derive(Debug, Clone)]
pub struct TapTempo {
    intervals: VecDeque<Duration>,
    last_beat: Option<Instant>,
    invalid_beats: u32,
    stable_count: u32,
    last_estimate: Option<u32>,
    double: bool,
}

impl TapTempo {
    pub fn new() -> Self {
        TapTempo {
            intervals: VecDeque::with_capacity(HISTORY_CAPACITY),
            last_beat: None,
            invalid_beats: 0,
            stable_count: 0,
            last_estimate: None,
            double: false,
        }
    }

    /// Remet la mesure à zéro. Le multiplicateur ×2 est conservé :
    /// il appartient au réglage, pas à la séance de frappe.
    pub fn reset(&mut self) {
        self.intervals.clear();
        self.last_beat = None;
        self.invalid_beats = 0;
        self.stable_count = 0;
        self.last_estimate = None;
    }

    pub fn set_double_tempo(&mut self, double: bool) {
        self.double = double;
    }

    pub fn multiplier(&self) -> u32 {
        if self.double { 2 } else { 1 }
    }

    pub fn record_tap(&mut self, now: Instant) -> TapOutcome {
        if let Some(last) = self.last_beat {
            if now.saturating_duration_since(last) < MIN_TAP_INTERVAL {
                return TapOutcome::Ignored;
            }
        }

        if self.invalid_beats < WARM_UP_TAPS {
            self.last_beat = Some(now);
            self.invalid_beats += 1;
            return TapOutcome::WarmUp {
                remaining: WARM_UP_TAPS - self.invalid_beats,
            };
        }

        // last_beat est toujours présent après l'échauffement
        let delta = match self.last_beat {
            Some(last) => now.saturating_duration_since(last),
            None => return TapOutcome::Ignored,
        };
        if self.intervals.len() == HISTORY_CAPACITY {
            self.intervals.pop_front();
        }
        self.intervals.push_back(delta);
        self.last_beat = Some(now);

        let bpm = self.compute_bpm();

        if self.last_estimate == Some(bpm) {
            self.stable_count += 1;
        } else {
            self.stable_count = 0;
        }
        self.last_estimate = Some(bpm);

        TapOutcome::Estimate {
            bpm,
            stabilized: self.stable_count > STABLE_THRESHOLD,
        }
    }

    /// 60 / intervalle moyen, multiplié puis arrondi.
    fn compute_bpm(&self) -> u32 {
        let total: f64 = self.intervals.iter().map(Duration::as_secs_f64).sum();
        let count = self.intervals.len() as f64;
        (60.0 * count * self.multiplier() as f64 / total).round() as u32
    }

    pub fn intervals(&self) -> impl Iterator<Item = Duration> + '_ {
        self.intervals.iter().copied()
    }

    pub fn interval_count(&self) -> usize {
        self.intervals.len()
    }

    pub fn stable_count(&self) -> u32 {
        self.stable_count
    }

    pub fn is_warmed_up(&self) -> bool {
        self.invalid_beats >= WARM_UP_TAPS
    }

    pub fn warm_up_remaining(&self) -> u32 {
        WARM_UP_TAPS.saturating_sub(self.invalid_beats)
    }
}

impl Default for TapTempo {
    fn default() -> Self {
        Self::new()
    }
}
