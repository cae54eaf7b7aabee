// ============================================================================
// SceneView : affichage du framebuffer en demi-blocs
// ============================================================================
// Chaque cellule du terminal affiche deux pixels verticaux :
// - le caractère '▀' prend la couleur du pixel du haut (fg)
// - le fond de la cellule prend celle du pixel du bas (bg)
//
// CONCEPT RATATUI : Widget custom
// - impl Widget : render(self, area, buf)
// - On écrit directement dans le Buffer, cellule par cellule
// ============================================================================

use ratatui::{buffer::Buffer, layout::Rect, style::Color, widgets::Widget};

use crate::engine::composer::Framebuffer;

pub struct SceneView<'a> {
    framebuffer: Option<&'a Framebuffer>,
}

impl<'a> SceneView<'a> {
    pub fn new(framebuffer: Option<&'a Framebuffer>) -> Self {
        Self { framebuffer }
    }
}

impl Widget for SceneView<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let Some(framebuffer) = self.framebuffer else {
            return;
        };

        for row in 0..area.height {
            for column in 0..area.width {
                let x = column as usize;
                let y = row as usize * 2;
                let top = framebuffer.pixel(x, y);
                let bottom = framebuffer.pixel(x, y + 1);

                buf.get_mut(area.x + column, area.y + row)
                    .set_char('▀')
                    .set_fg(to_terminal_color(top))
                    .set_bg(to_terminal_color(bottom));
            }
        }
    }
}

/// Couleur linéaire [0, 1] -> RGB 24 bits (saturée au-delà de 1)
pub fn to_terminal_color(color: [f32; 3]) -> Color {
    let channel = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    Color::Rgb(channel(color[0]), channel(color[1]), channel(color[2]))
}
