pub mod capability;
pub mod config;
pub mod error;
pub mod metadata;
pub mod now_playing;
pub mod paths;
pub mod persist;
pub mod rate_limit;
pub mod source;
pub mod time;
pub mod token;
pub mod transport;

pub use capability::{Capability, CapabilitySet};
pub use config::{build_config_template, GeneralConfig, LoggingConfig, ProvidersConfig, TunesyncConfig};

/// Re-export toml error type for config parsing error handling
pub use toml::de::Error as TomlParseError;
pub use error::CoreError;
pub use metadata::{MetaField, MetaValue, PlaybackStatus, ReleaseDate, TrackMetadata};
pub use now_playing::{NowPlayingEvent, NowPlayingStore};
pub use paths::{config_dir, log_file_path, token_cache_path, CONFIG_DIR_NAME, CONFIG_FILE_NAME, LOG_FILE_NAME};
pub use persist::{JsonFileTokenPersistence, MemoryTokenPersistence, TokenPersistence};
pub use rate_limit::RateLimitGate;
pub use source::{MusicSource, NowPlaying, NowPlayingParser, ParserRegistry, SourcePoller};
pub use time::{Clock, DurationExt, ManualClock, SystemClock};
pub use token::{Credentials, TokenState};
pub use transport::{
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError,
    DEFAULT_REQUEST_TIMEOUT,
};
