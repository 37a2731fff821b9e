// The control side of the engine: owns the audio handle, forwards commands to
// the render thread and fans step events back out to observers.
//
// Nothing in here runs on the audio thread. Observers are called from
// `dispatch`, which the owner polls (the TUI once per frame, the offline
// renderer once per block).

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};

use crate::audio::{self, AudioHandle, BreakPhase, StereoFrame};
use crate::audio_api::{AudioCommand, EngineEvent};
use crate::error::EngineError;
use crate::pipeline::patterns;
use crate::shared::{Layer, StepEvent, StepMask, BPM, NUM_LAYERS, SWING};

static NEXT_SEQUENCER: AtomicU64 = AtomicU64::new(0);

/// Where the sequencer sends its audio.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Output {
    /// The system's default output device, driven by its own callback.
    Device,
    /// No device; the caller pulls blocks with [`Sequencer::render`].
    Offline { sample_rate: u32 },
}

/// Returned by [`Sequencer::on_step`]; hand it back to `unsubscribe`.
#[derive(Debug, PartialEq, Eq)]
pub struct Subscription {
    owner: u64,
    id: u64,
}

type StepObserver = Box<dyn FnMut(StepEvent)>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BreakOutcome {
    Pending,
    Done,
    Interrupted,
}

/// Completion of one break/drop. Done once the bass is back in (520 ms after
/// the trigger); interrupted if the engine refused the break or went away
/// before getting there.
///
/// With an offline sequencer nothing moves unless someone renders, so poll
/// `is_done` between blocks rather than calling `wait`.
pub struct BreakHandle {
    rx: Receiver<()>,
    outcome: Cell<BreakOutcome>,
}

impl BreakHandle {
    fn settle(&self, outcome: BreakOutcome) -> BreakOutcome {
        self.outcome.set(outcome);
        outcome
    }

    fn poll(&self) -> BreakOutcome {
        match self.outcome.get() {
            BreakOutcome::Pending => match self.rx.try_recv() {
                Ok(()) => self.settle(BreakOutcome::Done),
                Err(TryRecvError::Disconnected) => self.settle(BreakOutcome::Interrupted),
                Err(TryRecvError::Empty) => BreakOutcome::Pending,
            },
            settled => settled,
        }
    }

    pub fn is_done(&self) -> bool {
        self.poll() == BreakOutcome::Done
    }

    pub fn is_interrupted(&self) -> bool {
        self.poll() == BreakOutcome::Interrupted
    }

    /// Block until the break completes.
    pub fn wait(&self) -> Result<(), EngineError> {
        let outcome = match self.poll() {
            BreakOutcome::Pending => match self.rx.recv() {
                Ok(()) => self.settle(BreakOutcome::Done),
                Err(_) => self.settle(BreakOutcome::Interrupted),
            },
            settled => settled,
        };
        match outcome {
            BreakOutcome::Interrupted => Err(EngineError::BreakInterrupted),
            _ => Ok(()),
        }
    }

    /// Like `wait`, but gives up after `timeout`. `Ok(false)` means still running.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool, EngineError> {
        let outcome = match self.poll() {
            BreakOutcome::Pending => match self.rx.recv_timeout(timeout) {
                Ok(()) => self.settle(BreakOutcome::Done),
                Err(RecvTimeoutError::Disconnected) => self.settle(BreakOutcome::Interrupted),
                Err(RecvTimeoutError::Timeout) => BreakOutcome::Pending,
            },
            settled => settled,
        };
        match outcome {
            BreakOutcome::Done => Ok(true),
            BreakOutcome::Pending => Ok(false),
            BreakOutcome::Interrupted => Err(EngineError::BreakInterrupted),
        }
    }
}

pub struct Sequencer {
    id: u64,
    output: Output,
    audio: Option<AudioHandle>,
    observers: Vec<(u64, StepObserver)>,
    next_observer: u64,
    started: [bool; NUM_LAYERS],
    masks: [Option<StepMask>; NUM_LAYERS],
    break_phase: BreakPhase,
}

impl Sequencer {
    pub fn new(output: Output) -> Self {
        Self {
            id: NEXT_SEQUENCER.fetch_add(1, Ordering::Relaxed),
            output,
            audio: None,
            observers: Vec::new(),
            next_observer: 0,
            started: [false; NUM_LAYERS],
            masks: [None; NUM_LAYERS],
            break_phase: BreakPhase::Idle,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.audio.is_some()
    }

    pub fn bpm(&self) -> f64 {
        BPM
    }

    pub fn swing(&self) -> f64 {
        SWING
    }

    /// None until initialized.
    pub fn sample_rate(&self) -> Option<u32> {
        self.audio.as_ref().map(AudioHandle::sample_rate)
    }

    /// Bring up the audio side: open the device (or build the offline engine),
    /// with the transport at 122 BPM and every voice constructed. Calling it
    /// again once it has succeeded does nothing.
    pub fn initialize(&mut self) -> Result<(), EngineError> {
        if self.audio.is_some() {
            tracing::debug!("already initialized");
            return Ok(());
        }
        let audio = match self.output {
            Output::Device => audio::start_audio()?,
            Output::Offline { sample_rate } => audio::offline(sample_rate)?,
        };
        tracing::info!(
            sample_rate = audio.sample_rate(),
            offline = audio.is_offline(),
            bpm = BPM,
            swing = SWING,
            "engine initialized"
        );
        self.audio = Some(audio);
        Ok(())
    }

    pub fn start_kick(&mut self) -> Result<(), EngineError> {
        self.start_layer(Layer::Kick)
    }

    pub fn start_perc(&mut self) -> Result<(), EngineError> {
        self.start_layer(Layer::Perc)
    }

    pub fn start_melody(&mut self) -> Result<(), EngineError> {
        self.start_layer(Layer::Melody)
    }

    pub fn start_drop(&mut self) -> Result<(), EngineError> {
        self.start_layer(Layer::Drop)
    }

    /// Start `layer`'s loop on the next sixteenth and publish its step mask.
    /// A layer that is already running is left alone.
    pub fn start_layer(&mut self, layer: Layer) -> Result<(), EngineError> {
        let audio = self.audio.as_ref().ok_or(EngineError::NotInitialized)?;
        if self.started[layer.index()] {
            tracing::debug!(%layer, "layer already running");
            return Ok(());
        }
        // nothing is published for a dropped start, so it can be retried
        if !audio.send(AudioCommand::StartLoop(layer)) {
            return Err(EngineError::CommandDropped);
        }
        self.publish(layer);
        tracing::info!(%layer, "layer started");
        Ok(())
    }

    /// Duck everything, bring in the riser at 80 ms, then slam back with the
    /// impact and the bassline at 520 ms.
    pub fn trigger_break_drop(&mut self) -> Result<BreakHandle, EngineError> {
        let audio = self.audio.as_ref().ok_or(EngineError::NotInitialized)?;
        if matches!(
            self.break_phase,
            BreakPhase::Ducking | BreakPhase::Rising | BreakPhase::Restoring
        ) {
            tracing::warn!(phase = ?self.break_phase, "break already in flight; the engine will refuse this one");
        }
        let (done, rx) = crossbeam_channel::bounded(1);
        // a failed send drops `done`, which the handle reads as interrupted
        audio.send(AudioCommand::BreakDrop { done });
        Ok(BreakHandle { rx, outcome: Cell::new(BreakOutcome::Pending) })
    }

    /// Register `callback` for every step of every running loop. Observers
    /// run in the order they were added.
    pub fn on_step(&mut self, callback: impl FnMut(StepEvent) + 'static) -> Subscription {
        let id = self.next_observer;
        self.next_observer += 1;
        self.observers.push((id, Box::new(callback)));
        Subscription { owner: self.id, id }
    }

    /// Returns false if the subscription was already removed or belongs to
    /// another sequencer.
    pub fn unsubscribe(&mut self, sub: Subscription) -> bool {
        if sub.owner != self.id {
            return false;
        }
        let before = self.observers.len();
        self.observers.retain(|(id, _)| *id != sub.id);
        self.observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// The steps `layer` sounds on, once it has started.
    pub fn active_steps(&self, layer: Layer) -> Option<StepMask> {
        self.masks[layer.index()]
    }

    pub fn is_layer_started(&self, layer: Layer) -> bool {
        self.started[layer.index()]
    }

    pub fn break_phase(&self) -> BreakPhase {
        self.break_phase
    }

    fn publish(&mut self, layer: Layer) {
        self.started[layer.index()] = true;
        self.masks[layer.index()] = Some(patterns::active_mask(layer));
    }

    /// Drain whatever the render side has reported since the last call and
    /// hand step events to the observers. Returns how many events were seen.
    pub fn dispatch(&mut self) -> usize {
        let Some(audio) = self.audio.as_ref() else {
            return 0;
        };
        let mut seen = 0;
        while let Some(event) = audio.poll_event() {
            seen += 1;
            match event {
                EngineEvent::Step(step) => {
                    for (_, observer) in self.observers.iter_mut() {
                        observer(step);
                    }
                }
                EngineEvent::LayerStarted(layer) => {
                    // the break starts the drop loop on its own
                    if !self.started[layer.index()] {
                        tracing::info!(%layer, "layer started by the engine");
                    }
                    self.started[layer.index()] = true;
                    self.masks[layer.index()] = Some(patterns::active_mask(layer));
                }
                EngineEvent::Break(phase) => {
                    tracing::info!(?phase, "break");
                    self.break_phase = phase;
                }
            }
        }
        seen
    }

    /// Render the next `out.len()` frames of an offline sequencer, then
    /// dispatch the events they produced.
    pub fn render(&mut self, out: &mut [StereoFrame]) -> Result<(), EngineError> {
        self.audio
            .as_mut()
            .ok_or(EngineError::NotInitialized)?
            .render(out)?;
        self.dispatch();
        Ok(())
    }

    /// Stop the transport, drop every loop and voice and close the output.
    /// Never fails; safe to call before `initialize` or more than once.
    /// Observers stay registered, so the sequencer can be initialized again.
    pub fn dispose(&mut self) {
        let Some(audio) = self.audio.take() else {
            return;
        };
        if let Err(e) = audio.close() {
            tracing::debug!("ignoring error while closing audio: {e}");
        }
        self.started = [false; NUM_LAYERS];
        self.masks = [None; NUM_LAYERS];
        self.break_phase = BreakPhase::Idle;
        tracing::info!("engine disposed");
    }
}

impl Drop for Sequencer {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    const SR: u32 = 22_050;
    const BLOCK: usize = 512;

    fn offline() -> Sequencer {
        let mut seq = Sequencer::new(Output::Offline { sample_rate: SR });
        seq.initialize().unwrap();
        seq
    }

    fn samples(secs: f64) -> usize {
        (secs * SR as f64).round() as usize
    }

    fn run(seq: &mut Sequencer, mut frames: usize) {
        let mut buf = vec![StereoFrame::zero(); BLOCK];
        while frames > 0 {
            let n = frames.min(BLOCK);
            seq.render(&mut buf[..n]).unwrap();
            frames -= n;
        }
    }

    fn record(seq: &mut Sequencer) -> (Rc<RefCell<Vec<StepEvent>>>, Subscription) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let sub = seq.on_step(move |ev| sink.borrow_mut().push(ev));
        (log, sub)
    }

    #[test]
    fn initialize_twice_keeps_one_engine() {
        let mut seq = offline();
        seq.start_kick().unwrap();
        run(&mut seq, samples(0.5));
        seq.initialize().unwrap();
        assert_eq!(seq.bpm(), 122.0);
        assert_eq!(seq.swing(), 0.08);
        assert_eq!(seq.sample_rate(), Some(SR));
        // same engine: the kick is still running without being restarted
        let (log, _sub) = record(&mut seq);
        run(&mut seq, samples(0.5));
        assert!(!log.borrow().is_empty());
        assert!(log.borrow().iter().all(|e| e.step != 0));
    }

    #[test]
    fn starting_before_initialize_fails_fast() {
        let mut seq = Sequencer::new(Output::Offline { sample_rate: SR });
        assert_eq!(seq.start_kick(), Err(EngineError::NotInitialized));
        assert!(matches!(seq.trigger_break_drop(), Err(EngineError::NotInitialized)));
        let mut buf = [StereoFrame::zero(); 4];
        assert_eq!(seq.render(&mut buf), Err(EngineError::NotInitialized));
        assert_eq!(seq.active_steps(Layer::Kick), None);
    }

    #[test]
    fn unusable_sample_rates_fail_initialize() {
        for sample_rate in [0, 22, 7_999] {
            let mut seq = Sequencer::new(Output::Offline { sample_rate });
            assert_eq!(seq.initialize(), Err(EngineError::UnsupportedSampleRate(sample_rate)));
            assert!(!seq.is_initialized());
            assert_eq!(seq.start_kick(), Err(EngineError::NotInitialized));
            seq.dispose();
        }
    }

    #[test]
    fn start_on_a_full_queue_reports_the_drop() {
        let mut seq = offline();
        if let Some(audio) = seq.audio.as_ref() {
            while audio.send(AudioCommand::Stop) {}
        }
        assert_eq!(seq.start_kick(), Err(EngineError::CommandDropped));
        assert!(!seq.is_layer_started(Layer::Kick));
        assert_eq!(seq.active_steps(Layer::Kick), None);

        // rendering drains the queue; the retry goes through
        run(&mut seq, 16);
        assert_eq!(seq.start_kick(), Ok(()));
        assert!(seq.active_steps(Layer::Kick).is_some());
    }

    #[test]
    fn kick_mask_is_published_on_start() {
        let mut seq = offline();
        assert_eq!(seq.active_steps(Layer::Kick), None);
        seq.start_kick().unwrap();
        let mask = seq.active_steps(Layer::Kick).unwrap().map(u8::from);
        assert_eq!(mask, [1, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 1]);
    }

    #[test]
    fn double_start_keeps_one_loop_and_the_same_mask() {
        let mut seq = offline();
        let (log, _sub) = record(&mut seq);
        seq.start_kick().unwrap();
        let mask = seq.active_steps(Layer::Kick);
        seq.start_kick().unwrap();
        assert_eq!(seq.active_steps(Layer::Kick), mask);
        run(&mut seq, samples(0.3));
        seq.start_kick().unwrap();
        run(&mut seq, samples(0.3));
        // one loop: every step seen once, in order
        let steps: Vec<u8> = log.borrow().iter().map(|e| e.step).collect();
        assert_eq!(steps, (0..steps.len() as u8).collect::<Vec<_>>());
    }

    #[test]
    fn thirty_two_ticks_deliver_thirty_two_events() {
        let mut seq = offline();
        let (log, _sub) = record(&mut seq);
        seq.start_melody().unwrap();
        // tick 31 lands at ~3.82 s, tick 32 at ~3.93 s
        run(&mut seq, samples(3.9));
        let log = log.borrow();
        assert_eq!(log.len(), 32);
        assert!(log.iter().all(|e| e.layer == Layer::Melody));
        let steps: Vec<u8> = log.iter().map(|e| e.step).collect();
        let expected: Vec<u8> = (0..16).chain(0..16).collect();
        assert_eq!(steps, expected);
    }

    #[test]
    fn observers_run_in_registration_order() {
        let mut seq = offline();
        let order = Rc::new(RefCell::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let order = Rc::clone(&order);
            seq.on_step(move |_| order.borrow_mut().push(tag));
        }
        seq.start_kick().unwrap();
        run(&mut seq, 16);
        assert_eq!(*order.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn unsubscribed_observers_stop_hearing_steps() {
        let mut seq = offline();
        let (kept, _keep) = record(&mut seq);
        let (dropped, sub) = record(&mut seq);
        seq.start_perc().unwrap();
        run(&mut seq, samples(0.2));
        let heard = dropped.borrow().len();
        assert!(heard > 0);

        assert!(seq.unsubscribe(sub));
        assert_eq!(seq.observer_count(), 1);
        run(&mut seq, samples(0.5));
        assert_eq!(dropped.borrow().len(), heard);
        assert!(kept.borrow().len() > heard);
    }

    #[test]
    fn subscriptions_do_not_cross_sequencers() {
        let mut a = offline();
        let mut b = offline();
        let sub = a.on_step(|_| {});
        b.on_step(|_| {});
        assert!(!b.unsubscribe(sub));
        assert_eq!(b.observer_count(), 1);
        assert_eq!(a.observer_count(), 1);
    }

    #[test]
    fn break_completes_at_520ms_and_brings_in_the_bass() {
        let mut seq = offline();
        seq.start_kick().unwrap();
        run(&mut seq, samples(0.25));

        let handle = seq.trigger_break_drop().unwrap();
        run(&mut seq, samples(0.1));
        assert_eq!(seq.break_phase(), BreakPhase::Rising);
        assert!(!handle.is_done());
        assert!(!seq.is_layer_started(Layer::Drop));

        run(&mut seq, samples(0.52) - samples(0.1));
        assert!(!handle.is_done(), "done before 520 ms");
        run(&mut seq, 1);
        assert!(handle.is_done());
        assert_eq!(handle.wait(), Ok(()));
        assert_eq!(handle.wait_timeout(Duration::ZERO), Ok(true));
        assert_eq!(seq.break_phase(), BreakPhase::Restoring);
        assert!(seq.is_layer_started(Layer::Drop));
        assert!(seq.active_steps(Layer::Drop).is_some());

        run(&mut seq, samples(0.05));
        assert_eq!(seq.break_phase(), BreakPhase::Done);
    }

    #[test]
    fn overlapping_break_is_interrupted() {
        let mut seq = offline();
        let first = seq.trigger_break_drop().unwrap();
        run(&mut seq, samples(0.1));
        let second = seq.trigger_break_drop().unwrap();
        run(&mut seq, 1);
        assert_eq!(second.wait(), Err(EngineError::BreakInterrupted));
        assert!(!second.is_done());
        run(&mut seq, samples(0.5));
        assert!(first.is_done());
    }

    #[test]
    fn dispose_interrupts_a_pending_break() {
        let mut seq = offline();
        let handle = seq.trigger_break_drop().unwrap();
        run(&mut seq, samples(0.1));
        seq.dispose();
        assert_eq!(handle.wait_timeout(Duration::from_millis(10)), Err(EngineError::BreakInterrupted));
    }

    #[test]
    fn dispose_is_always_safe() {
        let mut fresh = Sequencer::new(Output::Offline { sample_rate: SR });
        fresh.dispose();
        fresh.dispose();

        let mut seq = offline();
        seq.start_kick().unwrap();
        run(&mut seq, 64);
        seq.dispose();
        seq.dispose();
        assert!(!seq.is_initialized());
        assert_eq!(seq.active_steps(Layer::Kick), None);
        assert_eq!(seq.start_kick(), Err(EngineError::NotInitialized));
    }

    #[test]
    fn reinitialize_after_dispose_starts_clean() {
        let mut seq = offline();
        let (log, _sub) = record(&mut seq);
        seq.start_kick().unwrap();
        run(&mut seq, samples(0.3));
        seq.dispose();
        log.borrow_mut().clear();

        seq.initialize().unwrap();
        seq.start_kick().unwrap();
        run(&mut seq, 16);
        assert_eq!(log.borrow().first().map(|e| e.step), Some(0));
    }
}
