use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;

use crate::{
    actions::{Action, Response},
    config::Config,
    error::Error,
    server::DEFAULT_PORT,
};

/// The command line interface for sensor keel.
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a configuration file
    pub config: Option<PathBuf>,

    /// Port to serve subscribers on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Also log to a daily rotated file in this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Log debug output to stdout
    #[arg(short, long)]
    pub verbose: bool,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// The level to log to stdout at.
    pub fn stdout_level(&self) -> Level {
        if self.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        }
    }

    /// Where to log to file, if anywhere.
    pub fn file_logging(&self) -> Option<(Level, PathBuf)> {
        self.log_dir.clone().map(|dir| (Level::DEBUG, dir))
    }
}

/// Commands available in the command line interface.
#[derive(Subcommand)]
pub enum Commands {
    /// Examples for user convenience.
    #[clap(subcommand)]
    Examples(Examples),
}

/// Helpful examples for users.
#[derive(Subcommand, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Examples {
    /// Show an example of a configuration file's contents.
    Config,

    /// Show an example JSON request of switching the relay.
    Relay,

    /// Show an example JSON request of connecting to a port.
    Connect,

    /// Show an example JSON request of sharing settings.
    UpdateSettings,

    /// Show an example JSON response to a status request.
    Status,

    /// Show an example JSON response (from server to subscriber) of a new reading.
    Reading,

    /// Show an example JSON response (from server to subscriber) of a hazard.
    Hazard,

    /// Show an example JSON response to a port listing.
    Ports,
}

fn pretty_response(response: Response) -> String {
    let response: Result<_, Error> = Ok(response);

    serde_json::to_string_pretty(&response)
        .unwrap_or_else(|e| format!("Response could not be serialized: {e}"))
}

fn pretty_action(action: Action) -> String {
    serde_json::to_string_pretty(&action)
        .unwrap_or_else(|e| format!("Action could not be serialized: {e}"))
}

/// What an example looks like.
pub fn example_text(example: Examples) -> String {
    match example {
        Examples::Config => Config::example().serialize_pretty(),
        Examples::Relay => pretty_action(Action::example_relay()),
        Examples::Connect => pretty_action(Action::example_connect()),
        Examples::UpdateSettings => pretty_action(Action::example_update_settings()),
        Examples::Status => pretty_response(Response::example_status()),
        Examples::Reading => pretty_response(Response::example_reading()),
        Examples::Hazard => pretty_response(Response::example_hazard()),
        Examples::Ports => pretty_response(Response::example_ports()),
    }
}

/// Handle a command given on the command line.
pub fn handle_command(command: Commands) {
    match command {
        Commands::Examples(example) => println!("{}", example_text(example)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::parse_from(["sensor-keel"]);

        assert_eq!(cli.port, DEFAULT_PORT);
        assert_eq!(cli.stdout_level(), Level::INFO);
        assert!(cli.file_logging().is_none());
        assert!(cli.command.is_none());
    }

    #[test]
    fn options() {
        let cli = Cli::parse_from([
            "sensor-keel",
            "bench.ron",
            "--port",
            "4000",
            "--log-dir",
            "/tmp/logs",
            "-v",
        ]);

        assert_eq!(cli.config, Some(PathBuf::from("bench.ron")));
        assert_eq!(cli.port, 4000);
        assert_eq!(cli.stdout_level(), Level::DEBUG);
        assert_eq!(
            cli.file_logging(),
            Some((Level::DEBUG, PathBuf::from("/tmp/logs")))
        );
    }

    #[test]
    fn examples_subcommand() {
        let cli = Cli::parse_from(["sensor-keel", "examples", "update-settings"]);

        assert!(matches!(
            cli.command,
            Some(Commands::Examples(Examples::UpdateSettings))
        ));
    }

    #[test]
    fn example_config_parses_back() {
        let text = example_text(Examples::Config);

        assert_eq!(Config::deserialize(&text).unwrap(), Config::example());
    }

    #[test]
    fn example_relay_is_a_request() {
        let text = example_text(Examples::Relay);
        let action: Action = serde_json::from_str(&text).unwrap();

        assert_eq!(action, Action::relay(true));
    }
}
