use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use clap::{Parser, Subcommand};
use crossterm::terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use tracing_subscriber::EnvFilter;

use icebar::audio;
use icebar::middle::Middle;
use icebar::pipeline::bounce::{self, BounceOptions};
use icebar::tui;
use icebar::{Output, Sequencer};

#[derive(Parser)]
#[command(version, about = "Build an ice cream bar, build a deep house beat.")]
struct Cli {
    /// Write logs here while the terminal UI is up (they're dropped otherwise).
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Play live through the default output device (the default).
    Play,
    /// Render the whole journey to a WAV file without touching the sound card.
    Bounce {
        /// Where to write the WAV.
        out: PathBuf,
        #[arg(
            long,
            default_value_t = bounce::DEFAULT_SAMPLE_RATE,
            value_parser = clap::value_parser!(u32)
                .range(audio::MIN_SAMPLE_RATE as i64..=audio::MAX_SAMPLE_RATE as i64)
        )]
        sample_rate: u32,
        /// How many bars to render; the bite lands on bar 6.
        #[arg(long, default_value_t = bounce::DEFAULT_BARS)]
        bars: u32,
    },
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Play) {
        Commands::Play => {
            if let Some(path) = &cli.log_file {
                init_logging_to_file(path)?;
            }
            play()
        }
        Commands::Bounce { out, sample_rate, bars } => {
            tracing_subscriber::fmt().with_env_filter(env_filter()).with_writer(std::io::stderr).init();
            let summary = bounce::bounce(&out, BounceOptions { sample_rate, bars })?;
            println!(
                "wrote {} ({} frames, peak {:.3}{})",
                out.display(),
                summary.frames,
                summary.peak,
                if summary.finished { "" } else { ", stopped before the drop" }
            );
            Ok(())
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

// the tui owns the terminal, so logs only go to a file if one was asked for
fn init_logging_to_file(path: &Path) -> anyhow::Result<()> {
    let file = File::create(path)?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();
    Ok(())
}

fn play() -> anyhow::Result<()> {
    terminal::enable_raw_mode()?;
    // Enable keyboard enhancement for real press/release detection.
    // Falls back gracefully if the terminal doesn't support it.
    let _ = crossterm::execute!(
        std::io::stdout(),
        crossterm::event::PushKeyboardEnhancementFlags(
            crossterm::event::KeyboardEnhancementFlags::REPORT_EVENT_TYPES
        )
    );
    let _guard = RawModeGuard; // auto drops when out of scope

    // the engine comes up on the first choice, not here
    let mut middle = Middle::new(Sequencer::new(Output::Device));

    let backend = CrosstermBackend::new(std::io::stdout());
    let mut term = Terminal::new(backend)?;
    term.clear()?;

    let tick_rate = Duration::from_millis(16); // ~60fps

    loop {
        middle.tick();
        let ds = middle.display_state().clone();

        term.draw(|frame| {
            tui::view::render(frame, frame.area(), &ds);
        })?;

        for event in tui::input::poll_input(tick_rate)? {
            match middle.handle_input(event) {
                Ok(false) => {}
                Ok(true) => {
                    middle.shutdown();
                    return Ok(());
                }
                Err(e) => {
                    middle.shutdown();
                    return Err(e.into());
                }
            }
        }
    }
}

struct RawModeGuard;
impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = crossterm::execute!(
            std::io::stdout(),
            crossterm::event::PopKeyboardEnhancementFlags
        );
        let _ = terminal::disable_raw_mode();
    }
}
