use std::cell::RefCell;
use std::rc::Rc;

use crate::audio::StereoFrame;
use crate::error::EngineError;
use crate::pipeline::journey::{Cue, Journey};
use crate::sequencer::{BreakHandle, Sequencer, Subscription};
use crate::shared::{DisplayState, InputEvent, Layer, NUM_LAYERS};

// Glue between whatever front end is driving (tui or bounce script) and the
// sequencer: turns choices into engine calls and keeps the display state.
pub struct Middle {
    seq: Sequencer,
    journey: Journey,
    playheads: Rc<RefCell<[Option<u8>; NUM_LAYERS]>>,
    step_sub: Option<Subscription>,
    pending_break: Option<BreakHandle>,
    display: DisplayState,
}

impl Middle {
    pub fn new(mut seq: Sequencer) -> Self {
        let playheads = Rc::new(RefCell::new([None; NUM_LAYERS]));
        let heads = Rc::clone(&playheads);
        let step_sub = seq.on_step(move |ev| heads.borrow_mut()[ev.layer.index()] = Some(ev.step));
        let mut middle = Self {
            seq,
            journey: Journey::new(),
            playheads,
            step_sub: Some(step_sub),
            pending_break: None,
            display: DisplayState::default(),
        };
        middle.refresh_display();
        middle
    }

    pub fn display_state(&self) -> &DisplayState {
        &self.display
    }

    pub fn journey(&self) -> &Journey {
        &self.journey
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.seq
    }

    /// Returns true when the front end should quit.
    pub fn handle_input(&mut self, event: InputEvent) -> Result<bool, EngineError> {
        match event {
            InputEvent::Quit => Ok(true),
            InputEvent::Choose(n) => {
                if let Some(cue) = self.journey.choose(n) {
                    tracing::debug!(?cue, stage = ?self.journey.stage(), "journey cue");
                    if let Err(e) = self.apply(cue) {
                        // a refused break leaves the bite open
                        if cue == Cue::BreakDrop {
                            self.journey.break_failed();
                        }
                        self.refresh_display();
                        return Err(e);
                    }
                }
                self.refresh_display();
                Ok(false)
            }
        }
    }

    fn apply(&mut self, cue: Cue) -> Result<(), EngineError> {
        match cue {
            Cue::StartKick => {
                self.seq.initialize()?;
                self.seq.start_kick()
            }
            Cue::StartPerc => self.seq.start_perc(),
            Cue::StartMelody => self.seq.start_melody(),
            Cue::BreakDrop => {
                self.pending_break = Some(self.seq.trigger_break_drop()?);
                Ok(())
            }
        }
    }

    /// Pull events from the engine and settle a pending break. Call once per
    /// UI frame.
    pub fn tick(&mut self) {
        self.seq.dispatch();
        if let Some(handle) = &self.pending_break {
            if handle.is_done() {
                self.journey.break_landed();
                self.pending_break = None;
            } else if handle.is_interrupted() {
                tracing::warn!("break interrupted before the drop");
                self.journey.break_failed();
                self.pending_break = None;
            }
        }
        self.refresh_display();
    }

    /// Offline only: render the next block and tick.
    pub fn render(&mut self, out: &mut [StereoFrame]) -> Result<(), EngineError> {
        self.seq.render(out)?;
        self.tick();
        Ok(())
    }

    pub fn shutdown(&mut self) {
        if let Some(sub) = self.step_sub.take() {
            self.seq.unsubscribe(sub);
        }
        self.pending_break = None;
        self.seq.dispose();
    }

    fn refresh_display(&mut self) {
        let stage = self.journey.stage();
        let ds = &mut self.display;
        ds.stage_title = stage.title();
        ds.prompt = stage.prompt();
        ds.options = stage.options().to_vec();
        ds.selections = self.journey.selections().to_vec();
        ds.masks = Layer::ALL.map(|l| self.seq.active_steps(l));
        ds.playheads = *self.playheads.borrow();
        ds.dropping = self.journey.is_dropping();
        ds.finished = self.journey.is_complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::BreakPhase;
    use crate::pipeline::journey::Stage;
    use crate::sequencer::Output;

    const SR: u32 = 22_050;

    fn middle() -> Middle {
        Middle::new(Sequencer::new(Output::Offline { sample_rate: SR }))
    }

    fn run(m: &mut Middle, secs: f64) {
        let mut buf = vec![StereoFrame::zero(); 256];
        let mut left = (secs * SR as f64).round() as usize;
        while left > 0 {
            let n = left.min(buf.len());
            m.render(&mut buf[..n]).unwrap();
            left -= n;
        }
    }

    #[test]
    fn first_choice_initializes_and_starts_the_kick() {
        let mut m = middle();
        assert!(!m.sequencer().is_initialized());
        assert_eq!(m.display_state().stage_title, "The Dip");
        assert_eq!(m.display_state().options.len(), 4);

        assert_eq!(m.handle_input(InputEvent::Choose(0)), Ok(false));
        assert!(m.sequencer().is_initialized());
        let ds = m.display_state();
        assert!(ds.masks[Layer::Kick.index()].is_some());
        assert!(ds.masks[Layer::Perc.index()].is_none());
        assert_eq!(ds.stage_title, "The Crunch");
        assert_eq!(ds.selections, vec![("The Dip", "Dark Chocolate")]);
    }

    #[test]
    fn playheads_follow_the_running_layers() {
        let mut m = middle();
        m.handle_input(InputEvent::Choose(0)).unwrap();
        m.handle_input(InputEvent::Choose(0)).unwrap();
        run(&mut m, 0.3);
        let heads = m.display_state().playheads;
        assert_eq!(heads[Layer::Kick.index()], heads[Layer::Perc.index()]);
        assert!(heads[Layer::Kick.index()].is_some());
        assert_eq!(heads[Layer::Melody.index()], None);
    }

    #[test]
    fn the_bite_finishes_the_journey_once_the_drop_lands() {
        let mut m = middle();
        for _ in 0..4 {
            m.handle_input(InputEvent::Choose(0)).unwrap();
        }
        assert!(m.display_state().dropping);
        run(&mut m, 0.3);
        assert!(m.display_state().dropping);
        assert!(!m.display_state().finished);
        run(&mut m, 0.3);
        let ds = m.display_state();
        assert!(!ds.dropping);
        assert!(ds.finished);
        assert!(ds.masks.iter().all(Option::is_some));
        assert_eq!(m.journey().stage(), Stage::Complete);
        assert_eq!(m.sequencer().break_phase(), BreakPhase::Done);
    }

    #[test]
    fn quit_is_reported_and_shutdown_disposes() {
        let mut m = middle();
        m.handle_input(InputEvent::Choose(0)).unwrap();
        assert_eq!(m.handle_input(InputEvent::Quit), Ok(true));
        m.shutdown();
        assert!(!m.sequencer().is_initialized());
        assert_eq!(m.sequencer().observer_count(), 0);
        m.shutdown();
    }
}
