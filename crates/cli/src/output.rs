//! CLI output formatting utilities.
//!
//! Status lines go to stderr so that stdout can carry the rewritten
//! deployment template when no output file is given.

use std::time::Duration;

use owo_colors::{OwoColorize, Stream};

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
  pub const REBUILD: &str = "+";
  pub const REUSE: &str = "=";
}

/// Human duration for the run summary: `850ms`, `4.20s`, `2m 5s`.
pub fn format_duration(duration: Duration) -> String {
  match duration.as_secs() {
    0 => format!("{}ms", duration.subsec_millis()),
    secs @ 1..60 => format!("{}.{:02}s", secs, duration.subsec_millis() / 10),
    secs => format!("{}m {}s", secs / 60, secs % 60),
  }
}

/// Keep long artifact URIs readable in one column.
pub fn shorten_uri(uri: &str, max: usize) -> String {
  let count = uri.chars().count();
  if count <= max || max < 4 {
    return uri.to_string();
  }
  let tail: String = uri.chars().skip(count - (max - 3)).collect();
  format!("...{}", tail)
}

fn status(symbol: impl std::fmt::Display, message: impl std::fmt::Display) {
  eprintln!("{} {}", symbol, message);
}

pub fn print_success(message: &str) {
  status(symbols::SUCCESS.if_supports_color(Stream::Stderr, |s| s.green()), message);
}

pub fn print_error(message: &str) {
  status(
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red()),
  );
}

pub fn print_warning(message: &str) {
  status(
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow()),
  );
}

pub fn print_info(message: &str) {
  status(symbols::INFO.if_supports_color(Stream::Stderr, |s| s.blue()), message);
}

/// One line of the run plan.
pub fn print_unit(rebuild: bool, name: &str, detail: &str) {
  let symbol = if rebuild { symbols::REBUILD } else { symbols::REUSE };
  eprintln!(
    "  {} {} {} {}",
    symbol.if_supports_color(Stream::Stderr, |s| if rebuild { s.green().to_string() } else { s.dimmed().to_string() }),
    name,
    symbols::ARROW.if_supports_color(Stream::Stderr, |s| s.dimmed()),
    detail
  );
}

pub fn print_stat(label: &str, value: &str) {
  eprintln!("  {}: {}", label.if_supports_color(Stream::Stderr, |s| s.dimmed()), value);
}
