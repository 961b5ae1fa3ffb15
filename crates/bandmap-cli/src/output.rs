//! Terminal output: logging setup and the attach/detach progress line.
//!
//! Uses `termcolor` for the progress line and respects `NO_COLOR`.

use bandmap::Progress;
use std::io::{IsTerminal, Write};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Resolve `ColorChoice` for stderr.
///
/// Priority: `NO_COLOR` env > auto-detect TTY.
pub fn resolve_color_choice() -> ColorChoice {
    if std::env::var_os("NO_COLOR").is_some() || !std::io::stderr().is_terminal() {
        return ColorChoice::Never;
    }
    ColorChoice::Auto
}

/// Log filter for a `-v` count, unless `RUST_LOG` overrides it.
pub fn log_filter(verbosity: u8) -> String {
    std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter(verbosity).to_string())
}

fn default_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Install the global tracing subscriber, writing to stderr.
pub fn init_logging(verbosity: u8) {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(verbosity))
        .with_writer(std::io::stderr)
        .with_ansi(resolve_color_choice() != ColorChoice::Never)
        .with_target(false)
        .init();
}

/// Single-line `label count/total` counter on stderr.
///
/// Redraws at most once per percent of progress.
pub struct StderrProgress {
    stderr: Option<StandardStream>,
    label: String,
    count: u64,
    total: u64,
    step: u64,
}

impl StderrProgress {
    /// A counter over `total` units; `visible = false` swallows all output.
    pub fn new(total: u64, visible: bool) -> Self {
        Self {
            stderr: visible.then(|| StandardStream::stderr(resolve_color_choice())),
            label: String::new(),
            count: 0,
            total,
            step: (total / 100).max(1),
        }
    }

    fn render(&mut self) {
        let Some(stderr) = self.stderr.as_mut() else {
            return;
        };
        let mut spec = ColorSpec::new();
        spec.set_fg(Some(Color::Cyan)).set_bold(true);
        let _ = write!(stderr, "\r\x1b[2K");
        let _ = stderr.set_color(&spec);
        let _ = write!(stderr, "{}", self.label);
        let _ = stderr.reset();
        let _ = write!(stderr, " {}/{}", self.count, self.total);
        let _ = stderr.flush();
    }

    fn clear(&mut self) {
        if let Some(stderr) = self.stderr.as_mut() {
            let _ = write!(stderr, "\r\x1b[2K");
            let _ = stderr.flush();
        }
    }
}

impl Progress for StderrProgress {
    fn advance(&mut self, n: u64) {
        self.count += n;
        if self.count % self.step == 0 || self.count >= self.total {
            self.render();
        }
        if self.count >= self.total {
            self.clear();
        }
    }

    fn describe(&mut self, label: &str) {
        self.label = label.to_string();
    }

    fn reset(&mut self) {
        self.clear();
        self.count = 0;
    }
}

impl Drop for StderrProgress {
    fn drop(&mut self) {
        self.clear();
    }
}
