//! Terminal decoration for the harness: banner, screen clearing and the
//! rebuild spinner.

use std::io::Write;
use std::time::Duration;

use console::{Term, style};
use indicatif::{ProgressBar, ProgressStyle};

/// Braille glyph cycle shown while a build runs.
pub const SPINNER_GLYPHS: [&str; 8] = ["⣾", "⣽", "⣻", "⢿", "⡿", "⣟", "⣯", "⣷"];

const SPINNER_TICK: Duration = Duration::from_millis(100);

/// Endless iterator over [`SPINNER_GLYPHS`].
#[derive(Debug, Clone, Default)]
pub struct SpinnerFrames {
    index: usize,
}

impl SpinnerFrames {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Iterator for SpinnerFrames {
    type Item = &'static str;

    fn next(&mut self) -> Option<Self::Item> {
        let glyph = SPINNER_GLYPHS[self.index];
        self.index = (self.index + 1) % SPINNER_GLYPHS.len();
        Some(glyph)
    }
}

/// Animated status line on stderr.
///
/// Hidden automatically when stderr is not a terminal.
pub struct Spinner {
    bar: ProgressBar,
}

impl Spinner {
    /// Start spinning with `message`.
    pub fn start(message: impl Into<String>) -> Self {
        let bar = ProgressBar::new_spinner();
        let tick_strings: Vec<&str> = SPINNER_GLYPHS.iter().copied().chain(["✓"]).collect();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&tick_strings),
        );
        bar.set_message(message.into());
        bar.enable_steady_tick(SPINNER_TICK);
        Self { bar }
    }

    /// Remove the spinner line.
    pub fn stop(self) {
        self.bar.finish_and_clear();
    }
}

/// Print the startup banner with the application name and port.
pub fn print_banner(name: &str, port: u16) {
    let term = Term::stdout();
    let line = format!(
        "{} {}  {}",
        style(name).cyan().bold(),
        style(env!("CARGO_PKG_VERSION")).dim(),
        style(format!("watching, serving on :{port}")).green()
    );
    let _ = term.write_line(&line);
}

/// Clear the screen before a fresh child starts. No-op unless stdout is a TTY.
pub fn clear_terminal() {
    if is_terminal::is_terminal(std::io::stdout()) {
        let _ = Term::stdout().clear_screen();
        let _ = std::io::stdout().flush();
    }
}
