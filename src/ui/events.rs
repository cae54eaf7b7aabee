// ============================================================================
// Gestion des événements
// ============================================================================
// Lit le clavier et les redimensionnements, et cadence les frames
//
// CONCEPTS RUST :
// 1. Enums avec variants : représenter différents types d'événements
// 2. Traits : TerminalFrames implémente FrameSource pour la boucle de rendu
// 3. Error handling avec Result
// ============================================================================

use std::time::{Duration, Instant};

use anyhow::Result;
use crossterm::event::{self, Event as CrosstermEvent, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::layout::Rect;

use crate::engine::coordinator::{FrameEvent, FrameSource};
use crate::ui::dashboard::scene_viewport;

/// Événements du terminal
#[derive(Debug, Clone)]
pub enum Event {
    /// Touche pressée
    Key(KeyEvent),

    /// Terminal redimensionné (colonnes, lignes)
    Resize(u16, u16),

    /// Rien à signaler pendant le délai
    Tick,
}

/// Gestionnaire d'événements
pub struct EventHandler;

impl EventHandler {
    pub fn new() -> Self {
        Self
    }

    /// Lit le prochain événement (bloquant avec timeout)
    ///
    /// CONCEPT : Non-blocking I/O avec timeout
    /// - poll(timeout) attend au plus `timeout`
    /// - Si pas d'événement, retourne Ok(Event::Tick)
    pub fn next(&self, timeout: Duration) -> Result<Event> {
        if event::poll(timeout)? {
            match event::read()? {
                // Sur certains OS, on reçoit Press ET Release
                CrosstermEvent::Key(key) if key.kind == KeyEventKind::Press => Ok(Event::Key(key)),
                CrosstermEvent::Resize(columns, rows) => Ok(Event::Resize(columns, rows)),
                _ => Ok(Event::Tick),
            }
        } else {
            Ok(Event::Tick)
        }
    }
}

impl Default for EventHandler {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TerminalFrames : source de frames pour la boucle de rendu
// ============================================================================
// Une frame est émise quand l'intervalle est écoulé ; entre deux frames, les
// touches et les redimensionnements sont remontés tels quels.
// ============================================================================

pub struct TerminalFrames {
    handler: EventHandler,
    frame_interval: Duration,
    last_frame: Instant,
}

impl TerminalFrames {
    pub fn new(frame_interval: Duration) -> Self {
        Self {
            handler: EventHandler::new(),
            frame_interval,
            last_frame: Instant::now(),
        }
    }
}

impl FrameSource for TerminalFrames {
    fn next_event(&mut self) -> Result<FrameEvent> {
        loop {
            let timeout = self.frame_interval.saturating_sub(self.last_frame.elapsed());
            match self.handler.next(timeout)? {
                Event::Tick => {
                    if self.last_frame.elapsed() >= self.frame_interval {
                        self.last_frame = Instant::now();
                        return Ok(FrameEvent::Frame);
                    }
                }
                Event::Resize(columns, rows) => {
                    return Ok(FrameEvent::Resize(scene_viewport(Rect::new(0, 0, columns, rows))));
                }
                key @ Event::Key(_) => return Ok(FrameEvent::Input(key)),
            }
        }
    }
}

// ============================================================================
// Helpers : identifier les touches
// ============================================================================

/// Vérifie si l'événement est la touche 'q' (quitter)
pub fn is_quit_event(event: &Event) -> bool {
    if let Event::Key(key) = event {
        matches!(key.code, KeyCode::Char('q') | KeyCode::Char('Q'))
    } else {
        false
    }
}

/// Vérifie si l'événement est 'r' (fetch immédiat)
pub fn is_refresh_event(event: &Event) -> bool {
    if let Event::Key(key) = event {
        matches!(key.code, KeyCode::Char('r') | KeyCode::Char('R'))
    } else {
        false
    }
}

/// Ctrl+C : sortie sans confirmation
pub fn is_interrupt_event(event: &Event) -> bool {
    if let Event::Key(key) = event {
        key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL)
    } else {
        false
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_quit_event() {
        let quit_event = Event::Key(KeyEvent::new(KeyCode::Char('q'), KeyModifiers::empty()));
        assert!(is_quit_event(&quit_event));

        let other_event = Event::Key(KeyEvent::new(KeyCode::Char('a'), KeyModifiers::empty()));
        assert!(!is_quit_event(&other_event));

        assert!(!is_quit_event(&Event::Tick));
    }

    #[test]
    fn test_refresh_and_interrupt() {
        let refresh = Event::Key(KeyEvent::new(KeyCode::Char('r'), KeyModifiers::empty()));
        assert!(is_refresh_event(&refresh));
        assert!(!is_interrupt_event(&refresh));

        let plain_c = Event::Key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::empty()));
        assert!(!is_interrupt_event(&plain_c));

        let ctrl_c = Event::Key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL));
        assert!(is_interrupt_event(&ctrl_c));
    }
}
