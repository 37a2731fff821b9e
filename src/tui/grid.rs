use crate::shared::{Layer, StepMask, NUM_LAYERS, STEPS_PER_PATTERN};
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Style};
use ratatui::widgets::{Block, Paragraph};
use ratatui::Frame;

const LABEL_WIDTH: u16 = 6;

fn layer_label(layer: Layer) -> &'static str {
    match layer {
        Layer::Kick => "KICK",
        Layer::Perc => "PERC",
        Layer::Melody => "CHRD",
        Layer::Drop => "BASS",
    }
}

fn layer_color(layer: Layer) -> Color {
    match layer {
        Layer::Kick => Color::Yellow,
        Layer::Perc => Color::LightRed,
        Layer::Melody => Color::LightBlue,
        Layer::Drop => Color::Magenta,
    }
}

fn cell_style(layer: Layer, active: bool, playing: bool) -> Style {
    match (active, playing) {
        (true, true) => Style::default().fg(Color::Black).bg(Color::White),
        (true, false) => Style::default().bg(layer_color(layer)),
        (false, true) => Style::default().bg(Color::Gray),
        (false, false) => Style::default().bg(Color::DarkGray),
    }
}

// one row of 16 cells per layer; layers that haven't started stay blank
pub fn draw_step_rows(
    frame: &mut Frame,
    area: Rect,
    masks: &[Option<StepMask>; NUM_LAYERS],
    playheads: &[Option<u8>; NUM_LAYERS],
) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1); NUM_LAYERS])
        .split(area);

    for (layer, row_area) in Layer::ALL.into_iter().zip(rows.iter()) {
        let Some(mask) = masks[layer.index()] else {
            continue;
        };
        let mut cols = vec![Constraint::Length(LABEL_WIDTH)];
        cols.extend([Constraint::Length(3); STEPS_PER_PATTERN]);
        let cells = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(cols)
            .split(*row_area);

        let label = Paragraph::new(layer_label(layer)).style(Style::default().fg(layer_color(layer)));
        frame.render_widget(label, cells[0]);

        for (step, cell_area) in cells[1..].iter().enumerate() {
            let playing = playheads[layer.index()] == Some(step as u8);
            // leave a gap between cells
            let inner = Rect { width: cell_area.width.saturating_sub(1), ..*cell_area };
            frame.render_widget(Block::default().style(cell_style(layer, mask[step], playing)), inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playhead_wins_over_the_layer_colour() {
        assert_eq!(cell_style(Layer::Kick, true, true).bg, Some(Color::White));
        assert_eq!(cell_style(Layer::Kick, true, false).bg, Some(Color::Yellow));
        assert_eq!(cell_style(Layer::Drop, false, false).bg, Some(Color::DarkGray));
    }
}
