// ============================================================================
// Structure : App
// ============================================================================
// État du shell terminal autour de la visualisation
//
// CONCEPTS RUST :
// 1. State Management : centraliser l'état dans une seule structure
// 2. Mutabilité contrôlée : &mut self pour modifier l'état
// 3. Enums avec données : le statut du flux porte ses propres infos
//
// La scène elle-même vit dans le Visualizer ; App ne garde que ce que
// l'utilisateur voit autour : bannière de statut et confirmation de sortie.
// ============================================================================

use std::time::Duration;

use chrono::{DateTime, Local, Utc};

use crate::ui::events::{is_interrupt_event, is_quit_event, is_refresh_event, Event};

// ============================================================================
// Enum : FeedStatus
// ============================================================================
// CONCEPT RUST : Enums pour state machines
// - Loading : aucun snapshot reçu pour l'instant
// - Live : dernier fetch réussi
// - Error : dernier fetch en échec (l'état précédent reste affiché)
// ============================================================================

/// Statut du flux de données, affiché dans la bannière
#[derive(Debug, Clone, PartialEq)]
pub enum FeedStatus {
    Loading,
    Live {
        updated_at: DateTime<Utc>,
        instruments: usize,
    },
    Error {
        message: String,
        retry_in: Duration,
    },
    /// Worker arrêté : plus aucun fetch à venir
    Stopped {
        message: String,
    },
}

/// Action demandée par l'utilisateur, exécutée par la boucle de rendu
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppAction {
    None,
    Quit,
    Refresh,
}

/// État principal de l'application
pub struct App {
    /// Indique si l'application doit continuer à tourner
    pub running: bool,

    /// Indique si l'utilisateur a demandé à quitter (attend confirmation)
    /// CONCEPT : Two-step quit pour éviter les sorties accidentelles
    /// - Première pression de 'q' : confirm_quit = true
    /// - Deuxième pression de 'q' : running = false (quit réel)
    /// - N'importe quelle autre touche : confirm_quit = false (annulation)
    pub confirm_quit: bool,

    /// Un fetch est en cours
    pub is_loading: bool,

    pub status: FeedStatus,

    /// Dernier snapshot appliqué (survit aux erreurs)
    pub last_update: Option<DateTime<Utc>>,
}

impl App {
    pub fn new() -> Self {
        Self {
            running: true,
            confirm_quit: false,
            is_loading: false,
            status: FeedStatus::Loading,
            last_update: None,
        }
    }

    /// Quitte l'application
    pub fn quit(&mut self) {
        self.running = false;
    }

    /// Vérifie si l'application doit continuer
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Demande la confirmation de quitter
    pub fn request_quit(&mut self) {
        self.confirm_quit = true;
    }

    /// Annule la demande de quit
    pub fn cancel_quit(&mut self) {
        self.confirm_quit = false;
    }

    /// Vérifie si on attend la confirmation de quit
    pub fn is_awaiting_quit_confirmation(&self) -> bool {
        self.confirm_quit
    }

    // ========================================================================
    // Statut du flux
    // ========================================================================

    pub fn feed_started(&mut self) {
        self.is_loading = true;
    }

    pub fn feed_live(&mut self, updated_at: DateTime<Utc>, instruments: usize) {
        self.is_loading = false;
        self.last_update = Some(updated_at);
        self.status = FeedStatus::Live {
            updated_at,
            instruments,
        };
    }

    pub fn feed_failed(&mut self, message: String, retry_in: Duration) {
        self.is_loading = false;
        self.status = FeedStatus::Error { message, retry_in };
    }

    pub fn feed_stopped(&mut self, message: String) {
        self.is_loading = false;
        self.status = FeedStatus::Stopped { message };
    }

    /// Texte de la bannière (seul retour d'erreur visible par l'utilisateur)
    pub fn status_line(&self) -> String {
        match &self.status {
            FeedStatus::Loading => "loading".to_string(),
            FeedStatus::Live { updated_at, .. } => format!(
                "live (last update {})",
                updated_at.with_timezone(&Local).format("%H:%M:%S")
            ),
            FeedStatus::Error { message, retry_in } => {
                format!("error: {} retry in {}s", message, retry_in.as_secs())
            }
            FeedStatus::Stopped { message } => format!("error: {} (feed stopped)", message),
        }
    }

    // ========================================================================
    // Clavier
    // ========================================================================

    /// Traite un événement et retourne l'action à exécuter
    ///
    /// CONCEPT RUST : Pattern matching avec guards
    pub fn handle_event(&mut self, event: &Event) -> AppAction {
        match event {
            Event::Key(_) if is_interrupt_event(event) => {
                self.quit();
                AppAction::Quit
            }
            Event::Key(_) if is_quit_event(event) => {
                if self.is_awaiting_quit_confirmation() {
                    self.quit();
                    AppAction::Quit
                } else {
                    self.request_quit();
                    AppAction::None
                }
            }
            Event::Key(_) if is_refresh_event(event) => {
                self.cancel_quit();
                AppAction::Refresh
            }
            Event::Key(_) => {
                // Toute autre touche : annule la confirmation
                self.cancel_quit();
                AppAction::None
            }
            _ => AppAction::None,
        }
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests unitaires
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

    fn key(c: char) -> Event {
        Event::Key(KeyEvent::new(KeyCode::Char(c), KeyModifiers::empty()))
    }

    #[test]
    fn test_app_creation() {
        let app = App::new();
        assert!(app.is_running());
        assert_eq!(app.status, FeedStatus::Loading);
        assert_eq!(app.status_line(), "loading");
    }

    #[test]
    fn test_two_step_quit() {
        let mut app = App::new();

        assert_eq!(app.handle_event(&key('q')), AppAction::None);
        assert!(app.is_awaiting_quit_confirmation());
        assert!(app.is_running());

        assert_eq!(app.handle_event(&key('q')), AppAction::Quit);
        assert!(!app.is_running());
    }

    #[test]
    fn test_other_key_cancels_quit() {
        let mut app = App::new();
        app.handle_event(&key('q'));
        app.handle_event(&key('x'));
        assert!(!app.is_awaiting_quit_confirmation());

        app.handle_event(&key('q'));
        assert_eq!(app.handle_event(&key('r')), AppAction::Refresh);
        assert!(!app.is_awaiting_quit_confirmation());
        assert!(app.is_running());
    }

    #[test]
    fn test_ctrl_c_quits_immediately() {
        let mut app = App::new();
        let event = Event::Key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL));
        assert_eq!(app.handle_event(&event), AppAction::Quit);
        assert!(!app.is_running());
    }

    #[test]
    fn test_status_transitions() {
        let mut app = App::new();
        app.feed_started();
        assert!(app.is_loading);

        let now = Utc::now();
        app.feed_live(now, 12);
        assert!(!app.is_loading);
        assert!(app.status_line().starts_with("live (last update "));

        app.feed_failed("timeout".to_string(), Duration::from_secs(60));
        assert_eq!(app.status_line(), "error: timeout retry in 60s");
        // La date du dernier snapshot survit à l'erreur
        assert_eq!(app.last_update, Some(now));
    }

    #[test]
    fn test_stopped_feed_announces_no_retry() {
        let mut app = App::new();
        app.feed_started();
        app.feed_stopped("client HTTP indisponible".to_string());
        assert!(!app.is_loading);
        assert_eq!(app.status_line(), "error: client HTTP indisponible (feed stopped)");
        assert!(!app.status_line().contains("retry"));
    }
}
