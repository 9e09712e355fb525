use std::path::PathBuf;

use clap::Parser;

/// Percent added or removed by `+` and `-`
pub const VOLUME_STEP: i32 = 5;

#[derive(Debug, Parser, Clone)]
#[command(name = "airwave", version)]
#[command(about = "Resilient internet radio player")]
pub struct Cli {
    /// Stream or playlist (.pls, .m3u) URLs, best first.
    #[arg(required_unless_present = "list_devices")]
    pub urls: Vec<String>,

    /// Station title used in messages.
    #[arg(long)]
    pub title: Option<String>,

    /// Start volume in percent, saved on exit.
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub volume: Option<u8>,

    /// Output device name, see --list-devices.
    #[arg(long)]
    pub device: Option<String>,

    /// Use this settings file instead of the default one.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Write debug logs to the cache directory.
    #[arg(long)]
    pub debug: bool,

    /// Print the available output devices and exit.
    #[arg(long)]
    pub list_devices: bool,
}

impl Cli {
    pub fn station_title(&self) -> String {
        self.title
            .clone()
            .or_else(|| self.urls.first().cloned())
            .unwrap_or_default()
    }
}

/// A line typed on stdin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    TogglePause,
    VolumeUp,
    VolumeDown,
    ToggleMute,
    Reconnect,
    Status,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Option<Self> {
        let command = match line.trim() {
            "p" => Command::TogglePause,
            "+" | "=" => Command::VolumeUp,
            "-" => Command::VolumeDown,
            "m" => Command::ToggleMute,
            "r" => Command::Reconnect,
            "s" => Command::Status,
            "h" | "?" => Command::Help,
            "q" => Command::Quit,
            _ => return None,
        };
        Some(command)
    }
}

pub const HELP: &str = "commands: p pause/resume, +/- volume, m mute, r reconnect, s status, h help, q quit";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("p\n"), Some(Command::TogglePause));
        assert_eq!(Command::parse(" + "), Some(Command::VolumeUp));
        assert_eq!(Command::parse("-"), Some(Command::VolumeDown));
        assert_eq!(Command::parse("q"), Some(Command::Quit));
        assert_eq!(Command::parse("play"), None);
        assert_eq!(Command::parse(""), None);
    }

    #[test]
    fn test_urls_required_unless_listing() {
        assert!(Cli::try_parse_from(["airwave"]).is_err());
        assert!(Cli::try_parse_from(["airwave", "--list-devices"]).is_ok());

        let cli = Cli::try_parse_from([
            "airwave",
            "--volume",
            "40",
            "http://example.com/groovesalad256.pls",
        ])
        .unwrap();
        assert_eq!(cli.volume, Some(40));
        assert_eq!(cli.station_title(), "http://example.com/groovesalad256.pls");
        assert!(Cli::try_parse_from(["airwave", "--volume", "101", "http://x"]).is_err());
    }
}
