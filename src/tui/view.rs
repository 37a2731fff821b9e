use crate::shared::DisplayState;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::Frame;

use super::grid;

pub fn render(frame: &mut Frame, area: Rect, state: &DisplayState) {
    let sections = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4), // stage title + prompt
            Constraint::Length(6), // numbered options
            Constraint::Length(6), // step rows
            Constraint::Length(1), // status
            Constraint::Min(0),
        ])
        .split(area);

    draw_stage(frame, sections[0], state);
    draw_options(frame, sections[1], state);
    draw_steps(frame, sections[2], state);
    draw_status(frame, sections[3], state);
}

fn draw_stage(frame: &mut Frame, area: Rect, state: &DisplayState) {
    let picked: Vec<Span> = state
        .selections
        .iter()
        .map(|(_, choice)| Span::styled(format!("{choice}  "), Style::default().fg(Color::DarkGray)))
        .collect();
    let text = vec![
        Line::from(Span::styled(
            state.stage_title,
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )),
        Line::from(state.prompt),
        Line::from(picked),
    ];
    frame.render_widget(Paragraph::new(text), area);
}

fn draw_options(frame: &mut Frame, area: Rect, state: &DisplayState) {
    let lines: Vec<Line> = state
        .options
        .iter()
        .enumerate()
        .map(|(i, label)| {
            let style = if state.dropping {
                Style::default().fg(Color::DarkGray)
            } else {
                Style::default()
            };
            Line::from(Span::styled(format!(" {}  {label}", i + 1), style))
        })
        .collect();
    let block = Block::default().borders(Borders::TOP).title(" choose ");
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn draw_steps(frame: &mut Frame, area: Rect, state: &DisplayState) {
    let block = Block::default().borders(Borders::TOP).title(" layers ");
    let inner = block.inner(area);
    frame.render_widget(block, area);
    grid::draw_step_rows(frame, inner, &state.masks, &state.playheads);
}

fn draw_status(frame: &mut Frame, area: Rect, state: &DisplayState) {
    let (text, color) = if state.dropping {
        ("dropping...", Color::Magenta)
    } else if state.finished {
        ("done. q to quit", Color::Green)
    } else {
        ("1-4 choose   q quit", Color::DarkGray)
    };
    frame.render_widget(Paragraph::new(text).style(Style::default().fg(color)), area);
}
