use crossbeam_channel::Sender;

use crate::audio_api::{AudioCommand, EngineEvent};
use crate::pipeline::patterns::{self, Hit};
use crate::shared::{Layer, StepEvent, BPM, NUM_LAYERS, STEPS_PER_PATTERN, SWING};

use super::break_drop::{BreakAction, BreakDrop, DUCK_SECS, RESTORE_RAMP_SECS};
use super::effect::{Chorus, Effect, Filter, FilterKind, Lfo, Reverb};
use super::envelope::Adsr;
use super::frame::{self, StereoFrame};
use super::master::MasterBus;
use super::note::{self, db_to_gain, NoteValue};
use super::transport::Transport;
use super::voice::{FmParams, FmPoly, Instrument, Membrane, Metal, Mono, MonoParams, Noise, VoiceId};

// scratch size; bigger blocks get rendered in pieces
pub const MAX_BLOCK: usize = 4096;

const RISER_LENGTH: NoteValue = NoteValue::Seconds(0.4);
const IMPACT_LENGTH: NoteValue = NoteValue::Half;
const IMPACT_NOTE: &str = "C1";

#[derive(Clone, Copy, Debug)]
struct StepLoop {
    step: u64, // ticks seen so far; the pattern index is this mod 16
}

// One voice and the inserts between it and the master bus.
struct Channel {
    instrument: Box<dyn Instrument>,
    inserts: Vec<Box<dyn Effect>>,
}

impl Channel {
    fn dry(instrument: impl Instrument + 'static) -> Self {
        Self { instrument: Box::new(instrument), inserts: Vec::new() }
    }

    fn with(mut self, fx: impl Effect + 'static) -> Self {
        self.inserts.push(Box::new(fx));
        self
    }
}

// Lives on the audio side. Everything here runs inside the output callback
// (or the offline renderer), so nothing below allocates, blocks, or logs.
pub struct Engine {
    sample_rate: u32,
    clock: u64, // samples rendered since construction
    transport: Transport,
    loops: [Option<StepLoop>; NUM_LAYERS],
    channels: Vec<Channel>, // indexed by VoiceId
    master: MasterBus,
    break_drop: BreakDrop,
    break_done: Option<Sender<()>>,
    events: Sender<EngineEvent>,
    scratch: Vec<StereoFrame>,
}

impl Engine {
    pub fn new(sample_rate: u32, events: Sender<EngineEvent>) -> Self {
        let transport = Transport::new(BPM, SWING, sample_rate);
        let channels = build_channels(sample_rate as f32, &transport);
        Self {
            sample_rate,
            clock: 0,
            transport,
            loops: [None; NUM_LAYERS],
            channels,
            master: MasterBus::new(sample_rate as f32),
            break_drop: BreakDrop::new(sample_rate),
            break_done: None,
            events,
            scratch: vec![StereoFrame::zero(); MAX_BLOCK],
        }
    }

    #[cfg(test)]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[cfg(test)]
    pub fn clock(&self) -> u64 {
        self.clock
    }

    #[cfg(test)]
    pub fn master_gain(&self) -> f32 {
        self.master.gain()
    }

    #[cfg(test)]
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    #[cfg(test)]
    pub fn is_loop_running(&self, layer: Layer) -> bool {
        self.loops[layer.index()].is_some()
    }

    #[cfg(test)]
    pub fn break_phase(&self) -> super::BreakPhase {
        self.break_drop.phase()
    }

    #[cfg(test)]
    pub fn is_voice_sounding(&self, voice: VoiceId) -> bool {
        self.channels[voice.index()].instrument.is_sounding()
    }

    pub fn handle_cmd(&mut self, cmd: AudioCommand) {
        match cmd {
            AudioCommand::StartLoop(layer) => self.start_loop(layer),
            AudioCommand::BreakDrop { done } => self.begin_break(done),
            AudioCommand::Stop => self.stop(),
        }
    }

    pub fn render_block(&mut self, out: &mut [StereoFrame]) {
        frame::clear(out);
        let mut done = 0;
        while done < out.len() {
            self.fire_due();
            // split the block at the next tick or break deadline
            let mut n = (out.len() - done).min(MAX_BLOCK);
            if let Some(until) = self.next_event_in() {
                n = n.min(until.max(1) as usize);
            }
            self.render_segment(&mut out[done..done + n]);
            self.clock += n as u64;
            done += n;
        }
    }

    fn next_event_in(&self) -> Option<u64> {
        [self.break_drop.next_deadline(), self.transport.next_tick_at()]
            .into_iter()
            .flatten()
            .min()
            .map(|at| at.saturating_sub(self.clock))
    }

    fn render_segment(&mut self, out: &mut [StereoFrame]) {
        let scratch = &mut self.scratch[..out.len()];
        for ch in self.channels.iter_mut() {
            frame::clear(scratch);
            ch.instrument.render_into(scratch);
            // inserts keep running while the voice is quiet so tails and the
            // bass LFO don't jump
            for fx in ch.inserts.iter_mut() {
                fx.process(scratch);
            }
            frame::mix_into(out, scratch);
        }
        self.master.process(out);
    }

    // Everything due at the current sample, break transitions first so a
    // bass loop started by the restore joins on the same tick.
    fn fire_due(&mut self) {
        loop {
            if let Some(action) = self.break_drop.advance(self.clock) {
                self.apply_break(action);
                continue;
            }
            if self.transport.take_due_tick(self.clock).is_some() {
                self.fire_tick();
                continue;
            }
            break;
        }
    }

    fn fire_tick(&mut self) {
        for layer in Layer::ALL {
            let Some(lp) = self.loops[layer.index()].as_mut() else {
                continue;
            };
            let step = (lp.step % STEPS_PER_PATTERN as u64) as usize;
            lp.step += 1;

            for hit in patterns::hits(layer, step).into_iter().flatten() {
                self.trigger_hit(hit);
            }
            self.emit(EngineEvent::Step(StepEvent { layer, step: step as u8 }));
        }
    }

    fn trigger_hit(&mut self, hit: Hit) {
        self.trigger(hit.voice, hit.notes, hit.length, hit.velocity);
    }

    fn trigger(&mut self, voice: VoiceId, notes: &[&str], length: NoteValue, velocity: f32) {
        let secs = length.seconds(self.transport.bpm()) as f32;
        let inst = &mut self.channels[voice.index()].instrument;
        if notes.is_empty() {
            inst.trigger(None, secs, velocity);
            return;
        }
        for name in notes {
            if let Some(freq) = note::frequency(name) {
                inst.trigger(Some(freq), secs, velocity);
            }
        }
    }

    fn start_loop(&mut self, layer: Layer) {
        let slot = &mut self.loops[layer.index()];
        if slot.is_some() {
            return;
        }
        *slot = Some(StepLoop { step: 0 });
        // joins on the next unfired sixteenth; the first loop starts the clock
        self.transport.start(self.clock);
        self.emit(EngineEvent::LayerStarted(layer));
    }

    fn begin_break(&mut self, done: Sender<()>) {
        match self.break_drop.trigger(self.clock) {
            Some(action) => {
                self.break_done = Some(done);
                self.apply_break(action);
            }
            // one already running; dropping `done` tells the caller
            None => drop(done),
        }
    }

    fn apply_break(&mut self, action: BreakAction) {
        match action {
            BreakAction::Duck => {
                self.master.ramp_to(0.0, DUCK_SECS);
            }
            BreakAction::Rise => {
                self.trigger(VoiceId::Riser, &[], RISER_LENGTH, 1.0);
            }
            BreakAction::Restore => {
                self.master.ramp_to(1.0, RESTORE_RAMP_SECS);
                self.trigger(VoiceId::Impact, &[IMPACT_NOTE], IMPACT_LENGTH, 1.0);
                self.start_loop(Layer::Drop);
                if let Some(done) = self.break_done.take() {
                    let _ = done.try_send(());
                }
            }
            BreakAction::Settle => {}
        }
        self.emit(EngineEvent::Break(self.break_drop.phase()));
    }

    fn stop(&mut self) {
        self.transport.stop();
        self.loops = [None; NUM_LAYERS];
        for ch in self.channels.iter_mut() {
            ch.instrument.silence();
        }
        self.break_drop = BreakDrop::new(self.sample_rate);
        self.break_done = None;
        self.master.ramp_to(1.0, 0.0);
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.try_send(event);
    }
}

// The fixed instrument rack, in VoiceId order. Levels are the mix in dB.
fn build_channels(sr: f32, transport: &Transport) -> Vec<Channel> {
    let whole_note = NoteValue::Whole.seconds(transport.bpm()) as f32;

    let kick = Channel::dry(Membrane::new(0.05, 5.5, Adsr::new(0.002, 0.45, 0.0, 0.7), db_to_gain(-5.0), sr));

    let hihat_closed = Channel::dry(Metal::new(
        340.0,
        1.0,
        4200.0,
        Adsr::new(0.001, 0.05, 0.0, 0.02),
        db_to_gain(-23.0),
        sr,
    ));

    let hihat_open = Channel::dry(Metal::new(
        300.0,
        1.3,
        3800.0,
        Adsr::new(0.001, 0.18, 0.0, 0.12),
        db_to_gain(-24.0),
        sr,
    ));

    let clap = Channel::dry(Noise::new(Adsr::new(0.002, 0.1, 0.0, 0.06), db_to_gain(-15.0), 0xC1A9, sr))
        .with(Reverb::new(0.6, 0.25, sr));

    let chords = Channel::dry(FmPoly::new(
        FmParams {
            harmonicity: 1.5,
            modulation_index: 1.0,
            envelope: Adsr::new(0.008, 0.3, 0.25, 0.7),
            modulation_envelope: Adsr::new(0.08, 0.2, 0.3, 0.5),
        },
        db_to_gain(-15.0),
        sr,
    ))
    .with(Chorus::new(1.5, 3.5, 0.4, 0.2, sr))
    .with(Filter::new(FilterKind::LowPass, 2400.0, 0.8, -12, sr));

    // filter sweep: one LFO cycle per bar
    let bass = Channel::dry(Mono::new(
        MonoParams {
            envelope: Adsr::new(0.004, 0.2, 0.45, 0.25),
            filter_q: 1.5,
            filter_envelope: Adsr::new(0.004, 0.15, 0.35, 0.3),
            base_frequency: 90.0,
            octaves: 2.8,
        },
        db_to_gain(-9.0),
        sr,
    ))
    .with(Filter::new(FilterKind::LowPass, 550.0, 2.5, -24, sr).with_lfo(Lfo::new(1.0 / whole_note, 280.0, 750.0, sr)));

    let impact = Channel::dry(Membrane::new(0.12, 8.0, Adsr::new(0.001, 0.8, 0.0, 1.2), db_to_gain(-2.0), sr));

    let riser = Channel::dry(Noise::new(Adsr::new(0.35, 0.01, 1.0, 0.05), db_to_gain(-18.0), 0x5EED, sr));

    let channels = vec![kick, hihat_closed, hihat_open, clap, chords, bass, impact, riser];
    debug_assert_eq!(channels.len(), VoiceId::ALL.len());
    channels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::BreakPhase;
    use crossbeam_channel::{Receiver, TryRecvError};

    const SR: u32 = 48_000;

    fn engine() -> (Engine, Receiver<EngineEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Engine::new(SR, tx), rx)
    }

    fn render(engine: &mut Engine, frames: usize) -> Vec<StereoFrame> {
        let mut buf = vec![StereoFrame::zero(); frames];
        engine.render_block(&mut buf);
        buf
    }

    fn ms(ms: f64) -> usize {
        (ms * SR as f64 / 1000.0).round() as usize
    }

    fn steps(rx: &Receiver<EngineEvent>, layer: Layer) -> Vec<u8> {
        rx.try_iter()
            .filter_map(|e| match e {
                EngineEvent::Step(s) if s.layer == layer => Some(s.step),
                _ => None,
            })
            .collect()
    }

    fn peak(buf: &[StereoFrame]) -> f32 {
        buf.iter().map(|f| f.peak()).fold(0.0, f32::max)
    }

    #[test]
    fn nothing_ticks_before_a_layer_starts() {
        let (mut engine, rx) = engine();
        let out = render(&mut engine, SR as usize);
        assert!(!engine.transport().is_running());
        assert_eq!(rx.try_iter().count(), 0);
        assert_eq!(peak(&out), 0.0);
    }

    #[test]
    fn engine_uses_the_fixed_tempo_and_swing() {
        let (engine, _rx) = engine();
        assert_eq!(engine.transport().bpm(), 122.0);
        assert_eq!(engine.transport().swing(), 0.08);
    }

    #[test]
    fn thirty_two_ticks_give_thirty_two_events_in_order() {
        let (mut engine, rx) = engine();
        engine.handle_cmd(AudioCommand::StartLoop(Layer::Kick));
        // up to and including tick 31, not tick 32
        let last = engine.transport().tick_offset(31) as usize;
        render(&mut engine, last + 1);

        let seen = steps(&rx, Layer::Kick);
        let expected: Vec<u8> = (0..32).map(|i| (i % 16) as u8).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn ticks_land_on_their_exact_sample_across_block_sizes() {
        let (mut engine, rx) = engine();
        engine.handle_cmd(AudioCommand::StartLoop(Layer::Perc));
        let tick1 = engine.transport().tick_offset(1) as usize;
        // odd block sizes shouldn't matter
        let mut rendered = 0;
        while rendered < tick1 {
            let n = 37.min(tick1 - rendered);
            render(&mut engine, n);
            rendered += n;
        }
        assert_eq!(steps(&rx, Layer::Perc), vec![0]);
        render(&mut engine, 1);
        assert_eq!(steps(&rx, Layer::Perc), vec![1]);
    }

    #[test]
    fn starting_a_running_loop_changes_nothing() {
        let (mut engine, rx) = engine();
        engine.handle_cmd(AudioCommand::StartLoop(Layer::Kick));
        engine.handle_cmd(AudioCommand::StartLoop(Layer::Kick));
        let tick3 = engine.transport().tick_offset(3) as usize;
        render(&mut engine, tick3 + 1);

        let events: Vec<EngineEvent> = rx.try_iter().collect();
        let started = events.iter().filter(|e| matches!(e, EngineEvent::LayerStarted(_))).count();
        assert_eq!(started, 1);
        let ticks = events.iter().filter(|e| matches!(e, EngineEvent::Step(_))).count();
        assert_eq!(ticks, 4);
    }

    #[test]
    fn late_loops_join_on_the_grid_at_step_zero() {
        let (mut engine, rx) = engine();
        engine.handle_cmd(AudioCommand::StartLoop(Layer::Kick));
        // somewhere between tick 4 and tick 5
        let mid = engine.transport().tick_offset(4) as usize + 10;
        render(&mut engine, mid);
        rx.try_iter().for_each(drop);

        engine.handle_cmd(AudioCommand::StartLoop(Layer::Melody));
        let tick5 = engine.transport().tick_offset(5) as usize;
        render(&mut engine, tick5 - mid + 1);

        let events: Vec<EngineEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                EngineEvent::LayerStarted(Layer::Melody),
                EngineEvent::Step(StepEvent { layer: Layer::Kick, step: 5 }),
                EngineEvent::Step(StepEvent { layer: Layer::Melody, step: 0 }),
            ]
        );
    }

    #[test]
    fn kick_layer_makes_sound() {
        let (mut engine, _rx) = engine();
        engine.handle_cmd(AudioCommand::StartLoop(Layer::Kick));
        let out = render(&mut engine, ms(100.0));
        assert!(peak(&out) > 0.1);
        assert!(out.iter().all(|f| f.left.is_finite() && f.right.is_finite()));
    }

    #[test]
    fn break_runs_duck_rise_restore_on_schedule() {
        let (mut engine, rx) = engine();
        engine.handle_cmd(AudioCommand::StartLoop(Layer::Kick));
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        engine.handle_cmd(AudioCommand::BreakDrop { done: done_tx });
        assert_eq!(engine.break_phase(), BreakPhase::Ducking);

        // fully ducked well before the riser
        render(&mut engine, ms(60.0));
        assert_eq!(engine.master_gain(), 0.0);
        let quiet = render(&mut engine, ms(20.0));
        assert_eq!(peak(&quiet), 0.0);
        assert_eq!(engine.break_phase(), BreakPhase::Ducking);
        assert!(!engine.is_voice_sounding(VoiceId::Riser));

        // the sample at 80 ms: riser
        render(&mut engine, 1);
        assert_eq!(engine.break_phase(), BreakPhase::Rising);
        assert!(engine.is_voice_sounding(VoiceId::Riser));
        assert!(!engine.is_loop_running(Layer::Drop));

        // nothing completes before 520 ms
        render(&mut engine, ms(520.0) - ms(80.0) - 1);
        assert_eq!(done_rx.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(engine.break_phase(), BreakPhase::Rising);

        render(&mut engine, 1);
        assert_eq!(engine.break_phase(), BreakPhase::Restoring);
        assert_eq!(done_rx.try_recv(), Ok(()));
        assert!(engine.is_loop_running(Layer::Drop));
        assert!(engine.is_voice_sounding(VoiceId::Impact));

        render(&mut engine, ms(20.0));
        assert_eq!(engine.break_phase(), BreakPhase::Done);
        assert_eq!(engine.master_gain(), 1.0);

        let phases: Vec<BreakPhase> = rx
            .try_iter()
            .filter_map(|e| match e {
                EngineEvent::Break(p) => Some(p),
                _ => None,
            })
            .collect();
        assert_eq!(
            phases,
            vec![BreakPhase::Ducking, BreakPhase::Rising, BreakPhase::Restoring, BreakPhase::Done]
        );
    }

    #[test]
    fn break_with_nothing_playing_still_starts_the_bass() {
        let (mut engine, rx) = engine();
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        engine.handle_cmd(AudioCommand::BreakDrop { done: done_tx });
        render(&mut engine, ms(520.0) + 1);
        assert_eq!(done_rx.try_recv(), Ok(()));
        assert!(engine.transport().is_running());
        assert!(rx.try_iter().any(|e| e == EngineEvent::LayerStarted(Layer::Drop)));
        // the bass joins on the restore sample itself
        assert_eq!(steps(&rx, Layer::Drop), vec![0]);
    }

    #[test]
    fn overlapping_break_is_refused() {
        let (mut engine, _rx) = engine();
        let (first_tx, first_rx) = crossbeam_channel::bounded(1);
        let (second_tx, second_rx) = crossbeam_channel::bounded(1);
        engine.handle_cmd(AudioCommand::BreakDrop { done: first_tx });
        render(&mut engine, ms(100.0));
        engine.handle_cmd(AudioCommand::BreakDrop { done: second_tx });
        assert_eq!(second_rx.try_recv(), Err(TryRecvError::Disconnected));

        render(&mut engine, ms(500.0));
        assert_eq!(first_rx.try_recv(), Ok(()));
    }

    #[test]
    fn stop_clears_loops_and_breaks() {
        let (mut engine, _rx) = engine();
        engine.handle_cmd(AudioCommand::StartLoop(Layer::Kick));
        engine.handle_cmd(AudioCommand::StartLoop(Layer::Perc));
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        engine.handle_cmd(AudioCommand::BreakDrop { done: done_tx });
        render(&mut engine, ms(30.0));

        engine.handle_cmd(AudioCommand::Stop);
        assert!(!engine.transport().is_running());
        assert!(Layer::ALL.iter().all(|l| !engine.is_loop_running(*l)));
        assert!(VoiceId::ALL.iter().all(|v| !engine.is_voice_sounding(*v)));
        assert_eq!(engine.break_phase(), BreakPhase::Idle);
        assert_eq!(engine.master_gain(), 1.0);
        assert_eq!(done_rx.try_recv(), Err(TryRecvError::Disconnected));

        // stopping twice is harmless
        engine.handle_cmd(AudioCommand::Stop);
    }

    #[test]
    fn huge_blocks_are_split_internally() {
        let (mut engine, rx) = engine();
        engine.handle_cmd(AudioCommand::StartLoop(Layer::Drop));
        let out = render(&mut engine, MAX_BLOCK * 3 + 17);
        assert_eq!(out.len(), MAX_BLOCK * 3 + 17);
        assert!(!steps(&rx, Layer::Drop).is_empty());
        assert_eq!(engine.clock(), (MAX_BLOCK * 3 + 17) as u64);
    }
}
