// The guided build: dip, crunch, drizzle, bite. Each choice layers in one
// more part of the track; the bite drops the beat.
//
// This is pure bookkeeping. It hands back a `Cue` and whoever owns the
// sequencer acts on it.

use crate::shared::Layer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Dip,
    Crunch,
    Drizzle,
    Bite,
    Complete,
}

const COATINGS: &[&str] = &["Dark Chocolate", "Milk Chocolate", "Ruby Chocolate", "White Chocolate"];
const TOPPINGS: &[&str] = &["Crushed Nuts", "Cookie Crumbs", "Coconut Flakes", "Caramel Bits"];
const SYRUPS: &[&str] = &["Caramel", "Strawberry", "Dark Chocolate", "Salted Caramel"];
const BITE: &[&str] = &["Take a Bite"];

impl Stage {
    pub fn title(self) -> &'static str {
        match self {
            Stage::Dip => "The Dip",
            Stage::Crunch => "The Crunch",
            Stage::Drizzle => "The Drizzle",
            Stage::Bite | Stage::Complete => "The Bite",
        }
    }

    pub fn prompt(self) -> &'static str {
        match self {
            Stage::Dip => "Choose your chocolate coating",
            Stage::Crunch => "Add your toppings",
            Stage::Drizzle => "Select your syrup",
            Stage::Bite => "Take a bite to drop the beat",
            Stage::Complete => "Your bar is complete",
        }
    }

    pub fn options(self) -> &'static [&'static str] {
        match self {
            Stage::Dip => COATINGS,
            Stage::Crunch => TOPPINGS,
            Stage::Drizzle => SYRUPS,
            Stage::Bite => BITE,
            Stage::Complete => &[],
        }
    }

    fn next(self) -> Stage {
        match self {
            Stage::Dip => Stage::Crunch,
            Stage::Crunch => Stage::Drizzle,
            Stage::Drizzle => Stage::Bite,
            Stage::Bite | Stage::Complete => Stage::Complete,
        }
    }
}

/// What the sequencer has to do after a choice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cue {
    /// Initialize the engine, then start the kick.
    StartKick,
    StartPerc,
    StartMelody,
    BreakDrop,
}

impl Cue {
    pub fn layer(self) -> Option<Layer> {
        match self {
            Cue::StartKick => Some(Layer::Kick),
            Cue::StartPerc => Some(Layer::Perc),
            Cue::StartMelody => Some(Layer::Melody),
            Cue::BreakDrop => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Journey {
    stage: Stage,
    selections: Vec<(&'static str, &'static str)>,
    dropping: bool,
}

impl Default for Journey {
    fn default() -> Self {
        Self::new()
    }
}

impl Journey {
    pub fn new() -> Self {
        Self { stage: Stage::Dip, selections: Vec::new(), dropping: false }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// (stage title, chosen option) for every stage passed so far.
    pub fn selections(&self) -> &[(&'static str, &'static str)] {
        &self.selections
    }

    /// A break is on its way and the bite can't be taken again.
    pub fn is_dropping(&self) -> bool {
        self.dropping
    }

    pub fn is_complete(&self) -> bool {
        self.stage == Stage::Complete
    }

    /// Pick option `index` of the current stage. Out-of-range picks, picks
    /// while the break is dropping and picks after the end are ignored.
    pub fn choose(&mut self, index: u8) -> Option<Cue> {
        if self.dropping {
            return None;
        }
        let stage = self.stage;
        let choice = *stage.options().get(index as usize)?;
        let cue = match stage {
            Stage::Dip => Cue::StartKick,
            Stage::Crunch => Cue::StartPerc,
            Stage::Drizzle => Cue::StartMelody,
            Stage::Bite => {
                // stays on the bite until the drop lands
                self.dropping = true;
                return Some(Cue::BreakDrop);
            }
            Stage::Complete => return None,
        };
        self.selections.push((stage.title(), choice));
        self.stage = stage.next();
        Some(cue)
    }

    /// The break finished: the bass is in and the bar is done.
    pub fn break_landed(&mut self) {
        if !self.dropping {
            return;
        }
        self.dropping = false;
        self.selections.push((Stage::Bite.title(), BITE[0]));
        self.stage = Stage::Complete;
    }

    /// The break never made it; let the bite be retried.
    pub fn break_failed(&mut self) {
        self.dropping = false;
    }
}
