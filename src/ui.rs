// ============================================================
//  ui.rs — Interface TUI avec ratatui
//
//    - En-tête + statut de la sortie audio
//    - Tempo courant en gros, témoin de frappe / de clic
//    - Réglages : mesure, ×2, BPM, métronome
//    - Progression de la mesure (échauffement, stabilité)
//    - Aide clavier en bas
// ============================================================

use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph, Sparkline, Wrap},
    Frame,
};
use std::time::{Duration, Instant};

use crate::{
    app::{AppState, AudioStatus},
    config::{MAX_BPM, MIN_BPM},
    tempo::{TapOutcome, HISTORY_CAPACITY, STABLE_THRESHOLD, WARM_UP_TAPS},
};

// ─── Palette ──────────────────────────────────────────────────────────────────

const GREEN: Color = Color::Rgb(0, 255, 135);
const ORANGE: Color = Color::Rgb(255, 107, 53);
const CYAN: Color = Color::Rgb(0, 204, 255);
const RED: Color = Color::Rgb(255, 45, 85);
const YELLOW: Color = Color::Rgb(255, 214, 10);
const PURPLE: Color = Color::Rgb(168, 85, 247);
const GRAY: Color = Color::Rgb(80, 80, 100);
const WHITE: Color = Color::Rgb(220, 220, 230);
const BORDER: Color = Color::Rgb(35, 35, 55);

/// Durée d'allumage du témoin après une frappe ou un clic.
const FLASH: Duration = Duration::from_millis(120);

fn flashing(at: Option<Instant>) -> bool {
    at.map_or(false, |t| t.elapsed() < FLASH)
}

fn on_off(active: bool) -> Span<'static> {
    if active {
        Span::styled("● ON ", Style::default().fg(GREEN).add_modifier(Modifier::BOLD))
    } else {
        Span::styled("○ OFF", Style::default().fg(GRAY))
    }
}

// ─── Point d'entrée du rendu ──────────────────────────────────────────────────

pub fn draw(f: &mut Frame, state: &AppState) {
    let area = f.area();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(4), // Header
            Constraint::Min(9),    // Tempo + réglages
            Constraint::Length(6), // Mesure
            Constraint::Length(3), // Statut
            Constraint::Length(3), // Aide clavier
        ])
        .split(area);

    draw_header(f, chunks[0], state);

    let center = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(chunks[1]);
    draw_tempo(f, center[0], state);
    draw_controls(f, center[1], state);

    draw_measure(f, chunks[2], state);
    draw_status(f, chunks[3], state);
    draw_help(f, chunks[4]);
}

// ─── En-tête ──────────────────────────────────────────────────────────────────

fn draw_header(f: &mut Frame, area: Rect, state: &AppState) {
    let mode = if state.measuring {
        Span::styled("◉ MESURE", Style::default().fg(ORANGE).add_modifier(Modifier::BOLD))
    } else if state.metronome_running() {
        Span::styled("♪ MÉTRONOME", Style::default().fg(CYAN).add_modifier(Modifier::BOLD))
    } else {
        Span::styled("● PRÊT", Style::default().fg(GREEN))
    };

    let title = Line::from(vec![
        Span::styled("  Tap Tempo  ", Style::default().fg(WHITE).add_modifier(Modifier::BOLD)),
        Span::raw("  "),
        mode,
    ]);

    let subtitle = Line::from(Span::styled(
        "  Frappez en rythme avec la musique pour mesurer son tempo",
        Style::default().fg(GRAY),
    ));

    let device_line = match &state.audio {
        AudioStatus::Ready(name) => Line::from(vec![
            Span::styled("  Sortie : ", Style::default().fg(GRAY)),
            Span::styled(name.clone(), Style::default().fg(CYAN)),
        ]),
        AudioStatus::Unavailable(reason) => Line::from(vec![
            Span::styled("  Sortie : ", Style::default().fg(GRAY)),
            Span::styled(format!("indisponible — {}", reason), Style::default().fg(RED)),
        ]),
    };

    let block = Block::default()
        .borders(Borders::BOTTOM)
        .border_style(Style::default().fg(Color::Rgb(40, 40, 60)));

    let para = Paragraph::new(vec![title, subtitle, device_line])
        .block(block)
        .wrap(Wrap { trim: true });
    f.render_widget(para, area);
}

// ─── Tempo courant ────────────────────────────────────────────────────────────

fn draw_tempo(f: &mut Frame, area: Rect, state: &AppState) {
    let color = if state.measuring { ORANGE } else { CYAN };
    let block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(" Tempo ", Style::default().fg(color).add_modifier(Modifier::BOLD)))
        .border_style(Style::default().fg(BORDER));

    let tap_dot = if flashing(state.last_tap) {
        Span::styled("◉ frappe", Style::default().fg(ORANGE).add_modifier(Modifier::BOLD))
    } else {
        Span::styled("○ frappe", Style::default().fg(GRAY))
    };
    let click_dot = if flashing(state.last_click) {
        Span::styled("◉ clic", Style::default().fg(CYAN).add_modifier(Modifier::BOLD))
    } else {
        Span::styled("○ clic", Style::default().fg(GRAY))
    };

    let multiplier = if state.double { "  ×2" } else { "" };
    let period = match &state.metronome {
        Some(m) if m.is_running() => m.interval().as_secs_f64(),
        _ => 60.0 / state.bpm as f64,
    };

    let lines = vec![
        Line::from(""),
        Line::from(vec![
            Span::styled(
                format!("{}", state.bpm),
                Style::default().fg(WHITE).add_modifier(Modifier::BOLD),
            ),
            Span::styled(" BPM", Style::default().fg(GRAY)),
            Span::styled(multiplier, Style::default().fg(PURPLE).add_modifier(Modifier::BOLD)),
        ]),
        Line::from(Span::styled(
            format!("{:.3} s / temps", period),
            Style::default().fg(GRAY),
        )),
        Line::from(""),
        Line::from(vec![tap_dot, Span::raw("    "), click_dot]),
    ];

    f.render_widget(
        Paragraph::new(lines).block(block).alignment(Alignment::Center),
        area,
    );
}

// ─── Réglages ─────────────────────────────────────────────────────────────────

fn draw_controls(f: &mut Frame, area: Rect, state: &AppState) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(" Réglages ", Style::default().fg(GRAY)))
        .border_style(Style::default().fg(BORDER));

    let label = |s: &str| Span::styled(format!("  {:<12}", s), Style::default().fg(GRAY));

    let metronome = if !state.metronome_available() {
        Span::styled("indisponible", Style::default().fg(RED))
    } else if state.measuring {
        Span::styled("— (mesure)", Style::default().fg(GRAY))
    } else {
        on_off(state.metronome_running())
    };

    let lines = vec![
        Line::from(vec![label("Mesure"), on_off(state.measuring)]),
        Line::from(vec![label("Tempo ×2"), on_off(state.double)]),
        Line::from(vec![
            label("BPM"),
            Span::styled(
                format!("{:>3}", state.bpm),
                Style::default().fg(WHITE).add_modifier(Modifier::BOLD),
            ),
            Span::styled(format!("  ({}–{})", MIN_BPM, MAX_BPM), Style::default().fg(GRAY)),
        ]),
        Line::from(vec![label("Métronome"), metronome]),
    ];

    f.render_widget(Paragraph::new(lines).block(block), area);
}

// ─── Progression de la mesure ─────────────────────────────────────────────────

fn draw_measure(f: &mut Frame, area: Rect, state: &AppState) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Length(3)])
        .split(cols[0]);

    // ── Échauffement puis remplissage de l'historique ──
    let tempo = &state.tempo;
    let (title, ratio, label, color) = if !tempo.is_warmed_up() {
        let done = WARM_UP_TAPS - tempo.warm_up_remaining();
        (
            " Échauffement ",
            done as f64 / WARM_UP_TAPS as f64,
            format!("{}/{} frappes", done, WARM_UP_TAPS),
            YELLOW,
        )
    } else {
        (
            " Historique ",
            tempo.interval_count() as f64 / HISTORY_CAPACITY as f64,
            format!("{}/{} intervalles", tempo.interval_count(), HISTORY_CAPACITY),
            GREEN,
        )
    };
    let gauge = Gauge::default()
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(Span::styled(title, Style::default().fg(color)))
                .border_style(Style::default().fg(BORDER)),
        )
        .gauge_style(Style::default().fg(color).bg(Color::Rgb(10, 10, 20)))
        .ratio(ratio.clamp(0.0, 1.0))
        .label(label);
    f.render_widget(gauge, rows[0]);

    // ── Stabilité ──
    let needed = STABLE_THRESHOLD + 1;
    let stable = match state.last_outcome {
        Some(TapOutcome::Estimate { stabilized: true, .. }) => needed,
        _ => tempo.stable_count().min(needed),
    };
    let stability = Gauge::default()
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(Span::styled(" Stabilité ", Style::default().fg(PURPLE)))
                .border_style(Style::default().fg(BORDER)),
        )
        .gauge_style(Style::default().fg(PURPLE).bg(Color::Rgb(10, 10, 20)))
        .ratio(stable as f64 / needed as f64)
        .label(format!("{}/{}", stable, needed));
    f.render_widget(stability, rows[1]);

    // ── Intervalles mesurés (ms) ──
    let intervals: Vec<u64> = tempo.intervals().map(|d| d.as_millis() as u64).collect();
    let spark_block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(" Intervalles (ms) ", Style::default().fg(GRAY)))
        .border_style(Style::default().fg(BORDER));
    if intervals.is_empty() {
        let para = Paragraph::new(Span::styled(
            "  Aucun intervalle mesuré",
            Style::default().fg(GRAY),
        ))
        .block(spark_block);
        f.render_widget(para, cols[1]);
    } else {
        let sparkline = Sparkline::default()
            .block(spark_block)
            .data(&intervals)
            .style(Style::default().fg(ORANGE));
        f.render_widget(sparkline, cols[1]);
    }
}

// ─── Statut / erreur ──────────────────────────────────────────────────────────

fn draw_status(f: &mut Frame, area: Rect, state: &AppState) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(BORDER));

    let line = if let Some(notice) = &state.notice {
        Line::from(Span::styled(format!("  {}", notice), Style::default().fg(YELLOW)))
    } else if state.measuring {
        let hint = match state.last_outcome {
            Some(TapOutcome::Ignored) => "  Frappe trop rapprochée, ignorée".to_string(),
            Some(TapOutcome::Estimate { .. }) => {
                "  Continuez à frapper jusqu'à stabilisation".to_string()
            }
            _ => format!(
                "  Frappez [Espace] en rythme — encore {} frappe(s) d'échauffement",
                state.tempo.warm_up_remaining()
            ),
        };
        Line::from(Span::styled(hint, Style::default().fg(GRAY)))
    } else {
        Line::from(vec![
            Span::styled("  [M] Mesurer", Style::default().fg(CYAN).add_modifier(Modifier::BOLD)),
            Span::styled(" le tempo ou ", Style::default().fg(GRAY)),
            Span::styled("[T] Métronome", Style::default().fg(CYAN).add_modifier(Modifier::BOLD)),
            Span::styled(" au tempo affiché", Style::default().fg(GRAY)),
        ])
    };

    f.render_widget(Paragraph::new(line).block(block), area);
}

// ─── Aide clavier ─────────────────────────────────────────────────────────────

fn draw_help(f: &mut Frame, area: Rect) {
    let items: Vec<(&str, &str)> = vec![
        ("[M]", "Mesure"),
        ("[Espace]", "Frappe"),
        ("[X]", "×2"),
        ("[↑/↓]", "±1"),
        ("[PgUp/PgDn]", "±10"),
        ("[T]", "Métronome"),
        ("[Q]", "Quitter"),
    ];

    let spans: Vec<Span> = items
        .iter()
        .flat_map(|(key, desc)| {
            vec![
                Span::styled(format!(" {} ", key), Style::default().fg(CYAN).add_modifier(Modifier::BOLD)),
                Span::styled(format!("{} ", desc), Style::default().fg(GRAY)),
                Span::styled(" │ ", Style::default().fg(Color::Rgb(40, 40, 55))),
            ]
        })
        .collect();

    let block = Block::default()
        .borders(Borders::TOP)
        .border_style(Style::default().fg(Color::Rgb(35, 35, 50)));

    f.render_widget(Paragraph::new(Line::from(spans)).block(block), area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use clap::Parser;
    use ratatui::{backend::TestBackend, Terminal};

    fn render(state: &AppState) -> String {
        let mut terminal = Terminal::new(TestBackend::new(100, 30)).unwrap();
        terminal.draw(|f| draw(f, state)).unwrap();
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    fn idle_state() -> AppState {
        let config = Config::try_parse_from(["tap-tempo", "--bpm", "96"]).unwrap();
        AppState::new(&config, None, AudioStatus::Unavailable("test".into()))
    }

    #[test]
    fn idle_screen_shows_tempo_and_disabled_metronome() {
        let screen = render(&idle_state());
        assert!(screen.contains("Tap Tempo"));
        assert!(screen.contains("96 BPM"));
        assert!(screen.contains("indisponible"));
        assert!(screen.contains("Aucun intervalle"));
    }

    #[test]
    fn measuring_screen_shows_progress() {
        let mut state = idle_state();
        state.toggle_measuring();
        let base = Instant::now();
        for i in 0..8u32 {
            state.beat(base + Duration::from_millis(500) * i);
        }
        let screen = render(&state);
        assert!(screen.contains("MESURE"));
        assert!(screen.contains("120 BPM"));
        assert!(screen.contains("3/20 intervalles"));
        assert!(screen.contains("2/6"));
    }
}
