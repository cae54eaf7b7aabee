// ============================================================================
// Dashboard - Rendu de l'interface principale
// ============================================================================
// Header (titre, nombre de noeuds, statut du flux), scène 3D, footer (touches)
//
// CONCEPTS RATATUI :
// 1. Frame : surface de dessin
// 2. Widgets : composants UI (Block, Paragraph, SceneView)
// 3. Layout : découpage de l'espace en zones
// 4. Style : couleurs et attributs de texte
// ============================================================================

use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

use crate::app::{App, FeedStatus};
use crate::engine::coordinator::Visualizer;
use crate::engine::scene::Viewport;
use crate::ui::scene_view::SceneView;

/// Dessine l'interface complète
pub fn render(frame: &mut Frame, app: &App, visualizer: &Visualizer) {
    let chunks = create_layout(frame.size());

    render_header(frame, app, visualizer, chunks[0]);
    render_scene(frame, visualizer, chunks[1]);
    render_footer(frame, app, chunks[2]);
}

/// Taille en pixels de la surface de rendu pour un terminal donné
///
/// Une cellule affiche deux pixels verticaux (demi-blocs).
pub fn scene_viewport(area: Rect) -> Viewport {
    let chunks = create_layout(area);
    let inner = scene_block().inner(chunks[1]);
    Viewport::new(inner.width.max(1) as usize, (inner.height.max(1) as usize) * 2)
}

// ============================================================================
// Layout : Découpage de l'écran
// ============================================================================

/// Crée le layout principal (header, scène, footer)
fn create_layout(area: Rect) -> Vec<Rect> {
    Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header : 3 lignes
            Constraint::Min(0),    // Scène : tout le reste
            Constraint::Length(3), // Footer : 3 lignes
        ])
        .split(area)
        .to_vec()
}

fn scene_block() -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
}

// ============================================================================
// Header : titre + bannière de statut
// ============================================================================

fn render_header(frame: &mut Frame, app: &App, visualizer: &Visualizer, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(" MarketOrbit ")
        .title_alignment(Alignment::Center);

    let status_color = match app.status {
        FeedStatus::Loading => Color::Yellow,
        FeedStatus::Live { .. } => Color::Green,
        FeedStatus::Error { .. } | FeedStatus::Stopped { .. } => Color::Red,
    };

    let mut spans = vec![
        Span::styled(
            format!("{} instruments", visualizer.registry().len()),
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ),
        Span::raw("  │  "),
        Span::styled(
            app.status_line(),
            Style::default().fg(status_color).add_modifier(Modifier::BOLD),
        ),
    ];
    if app.is_loading {
        spans.push(Span::styled("  ⟳", Style::default().fg(Color::Yellow)));
    }

    let paragraph = Paragraph::new(Line::from(spans))
        .block(block)
        .alignment(Alignment::Center);

    frame.render_widget(paragraph, area);
}

// ============================================================================
// Scène
// ============================================================================

fn render_scene(frame: &mut Frame, visualizer: &Visualizer, area: Rect) {
    let block = scene_block();
    let inner = block.inner(area);
    frame.render_widget(block, area);
    frame.render_widget(SceneView::new(visualizer.scene().output()), inner);
}

// ============================================================================
// Footer : Instructions
// ============================================================================

/// Dessine le footer avec les raccourcis clavier
fn render_footer(frame: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let shortcuts = if app.is_awaiting_quit_confirmation() {
        Line::from(vec![
            Span::styled("⚠  ", Style::default().fg(Color::Yellow)),
            Span::styled(
                "[q]",
                Style::default()
                    .fg(Color::Red)
                    .add_modifier(Modifier::BOLD)
                    .add_modifier(Modifier::SLOW_BLINK),
            ),
            Span::styled(
                " à nouveau pour quitter, autre touche pour annuler",
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
            ),
        ])
    } else {
        Line::from(vec![
            Span::styled("[q]", Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
            Span::raw(" Quit  "),
            Span::styled("[r]", Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)),
            Span::raw(" Refresh"),
        ])
    };

    let paragraph = Paragraph::new(vec![shortcuts])
        .block(block)
        .alignment(Alignment::Center);

    frame.render_widget(paragraph, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use ratatui::{backend::TestBackend, Terminal};
    use tokio_util::sync::CancellationToken;

    fn screen_text(terminal: &Terminal<TestBackend>) -> String {
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn test_scene_viewport_uses_half_blocks() {
        // 24 lignes - header - footer = 18, moins les bordures = 16 cellules
        assert_eq!(scene_viewport(Rect::new(0, 0, 80, 24)), Viewport::new(78, 32));
    }

    #[test]
    fn test_render_shows_banner_and_keys() {
        let area = Rect::new(0, 0, 80, 24);
        let mut visualizer = Visualizer::new(&Config::default(), scene_viewport(area), CancellationToken::new());
        visualizer.tick();
        let mut app = App::new();

        let mut terminal = Terminal::new(TestBackend::new(80, 24)).unwrap();
        terminal.draw(|f| render(f, &app, &visualizer)).unwrap();
        let text = screen_text(&terminal);
        assert!(text.contains("MarketOrbit"));
        assert!(text.contains("0 instruments"));
        assert!(text.contains("loading"));
        assert!(text.contains("Refresh"));

        app.request_quit();
        terminal.draw(|f| render(f, &app, &visualizer)).unwrap();
        assert!(screen_text(&terminal).contains("nouveau pour quitter"));
    }
}
