use std::time::Duration;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crate::shared::InputEvent;

// poll for a key press and turn it into input events; empty if nothing came
// in before the timeout
pub fn poll_input(timeout: Duration) -> anyhow::Result<Vec<InputEvent>> {
    if !event::poll(timeout)? {
        return Ok(vec![]);
    }

    if let Event::Key(key) = event::read()? {
        if key.kind != KeyEventKind::Press {
            return Ok(vec![]);
        }
        return Ok(handle_key(key.code));
    }
    Ok(vec![])
}

fn handle_key(code: KeyCode) -> Vec<InputEvent> {
    match code {
        KeyCode::Esc | KeyCode::Char('q') => vec![InputEvent::Quit],
        // options are numbered from 1 on screen
        KeyCode::Char(c @ '1'..='4') => vec![InputEvent::Choose(c as u8 - b'1')],
        _ => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_keys_choose_and_escape_quits() {
        assert_eq!(handle_key(KeyCode::Char('1')), vec![InputEvent::Choose(0)]);
        assert_eq!(handle_key(KeyCode::Char('4')), vec![InputEvent::Choose(3)]);
        assert_eq!(handle_key(KeyCode::Esc), vec![InputEvent::Quit]);
        assert_eq!(handle_key(KeyCode::Char('q')), vec![InputEvent::Quit]);
        assert!(handle_key(KeyCode::Char('5')).is_empty());
        assert!(handle_key(KeyCode::Enter).is_empty());
    }
}
