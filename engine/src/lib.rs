pub mod config;
pub mod grouping;
pub mod replay;
pub mod session;
pub mod store;
pub mod timer;
pub mod typing;

pub use config::EngineConfig;
pub use grouping::{format_message_time, group_by_day, DayGroup, DayLabel};
pub use session::{
    ChannelTransport, ConversationSession, ConversationView, HistoryError, HistoryFetcher,
    HistoryStatus, LiveTransport, SessionError, SessionHandle, SessionRuntime,
};
pub use store::{MessageStore, SelectionToken};
pub use typing::{LocalIntent, TypingController, TypingSignal};

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .init();
}
