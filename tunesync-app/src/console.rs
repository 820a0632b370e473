//! Keyboard transport controls read from stdin.

use std::io::BufRead;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tunesync_core::{Capability, NowPlayingStore, TrackMetadata};
use tunesync_spotify::{CommandDispatcher, TokenStore};

pub const HELP: &str = "Controls: n = next, p = previous, space/t = play/pause, s = stop, \
+/- = volume, i = now playing, l = log out, q = quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Control(Capability),
    Show,
    Logout,
    Quit,
}

/// Map one input line to a command.
#[must_use]
pub fn parse_command(line: &str) -> Option<ConsoleCommand> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line == " " {
        return Some(ConsoleCommand::Control(Capability::PlayPause));
    }

    let command = match line.trim() {
        "n" => ConsoleCommand::Control(Capability::Next),
        "p" => ConsoleCommand::Control(Capability::Previous),
        "t" => ConsoleCommand::Control(Capability::PlayPause),
        "s" => ConsoleCommand::Control(Capability::Stop),
        "+" => ConsoleCommand::Control(Capability::VolumeUp),
        "-" => ConsoleCommand::Control(Capability::VolumeDown),
        "i" => ConsoleCommand::Show,
        "l" => ConsoleCommand::Logout,
        "q" => ConsoleCommand::Quit,
        _ => return None,
    };
    Some(command)
}

/// Read commands until stdin closes or the app shuts down.
///
/// Runs on its own OS thread; network calls go through `dispatcher` and
/// never block this loop.
pub fn run(
    dispatcher: &CommandDispatcher,
    tokens: &TokenStore,
    store: &Arc<NowPlayingStore>,
    runtime: &Handle,
    cancel_token: &CancellationToken,
) {
    info!("{HELP}");

    for line in std::io::stdin().lock().lines() {
        if cancel_token.is_cancelled() {
            break;
        }
        let Ok(line) = line else {
            break;
        };

        match parse_command(&line) {
            Some(ConsoleCommand::Control(capability)) => {
                let status = runtime.block_on(store.current_status());
                if !dispatcher.dispatch(capability, status) {
                    warn!("{} is not supported by this source", capability);
                }
            }
            Some(ConsoleCommand::Show) => {
                let metadata = runtime.block_on(store.current_metadata());
                info!("{}", describe(&metadata));
            }
            Some(ConsoleCommand::Logout) => {
                runtime.block_on(tokens.logout());
                info!("Run tunesync again to log in");
                cancel_token.cancel();
                break;
            }
            Some(ConsoleCommand::Quit) => {
                cancel_token.cancel();
                break;
            }
            None if line.trim().is_empty() => {}
            None => info!("{HELP}"),
        }
    }
}

/// One-line summary of a metadata record
#[must_use]
pub fn describe(metadata: &TrackMetadata) -> String {
    let Some(title) = metadata.title() else {
        return format!("Nothing playing ({})", metadata.status());
    };

    let mut line = format!("[{}] {}", metadata.status(), title);
    if !metadata.artists().is_empty() {
        line.push_str(" - ");
        line.push_str(&metadata.artists().join(", "));
    }
    if let Some(album) = metadata.album() {
        line.push_str(&format!(" ({album})"));
    }
    if let Some(playlist) = metadata.playlist_name() {
        line.push_str(&format!(" from {playlist}"));
    }
    line
}
