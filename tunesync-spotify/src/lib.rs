pub mod commands;
pub mod config;
pub mod error;
pub mod oauth;
pub mod parser;
pub mod poller;

#[cfg(test)]
mod test_support;

pub use commands::CommandDispatcher;
pub use config::{
    SpotifyProviderConfig, CONFIG_TEMPLATE as SPOTIFY_CONFIG_TEMPLATE, DEFAULT_REDIRECT_URI,
    PROVIDER_NAME, SPOTIFY_TOKEN_CACHE_FILE_NAME,
};
pub use error::SpotifyError;
pub use oauth::{redact_token_response, TokenStore};
pub use parser::{SpotifyParser, SPOTIFY_CAPABILITIES};
pub use poller::{EngineState, PollingEngine};
