//! Conversational back-ends behind one blocking contract.
//!
//! [`ChatProvider`] is implemented by four variants: a direct cloud endpoint,
//! an OAuth2-proxied cloud endpoint, the offline rule engine, and an external
//! event-driven session host. [`AsyncBridge`] lets the blocking variants drive
//! async I/O with bounded waits, and [`AccessTokenCache`] manages bearer
//! tokens for the proxied variant.

mod async_bridge;
mod config;
mod conversation;
mod direct;
mod error;
mod media;
mod oauth;
mod provider;
mod rules;
mod session_provider;
mod session_transport;
mod token_cache;

pub use async_bridge::{AsyncBridge, BridgeError};
pub use config::{
    build_provider, CloudBackend, ProviderConfig, ProviderSelection, DEFAULT_BRIDGE_WORKERS,
    DEFAULT_GOOGLE_API_BASE, DEFAULT_GOOGLE_MODEL, DEFAULT_MAX_HISTORY_TURNS, DEFAULT_MAX_TOKENS,
    DEFAULT_OPENAI_API_BASE, DEFAULT_OPENAI_MODEL, DEFAULT_REQUEST_TIMEOUT_MS,
    DEFAULT_SYSTEM_PROMPT, DEFAULT_TOKEN_TIMEOUT_MS,
};
pub use conversation::ConversationSettings;
pub use direct::DirectCloudProvider;
pub use error::{ErrorClass, ProviderError};
pub use media::{sniff_image_mime, DEFAULT_IMAGE_PROMPT};
pub use oauth::OAuthProxiedProvider;
pub use provider::{ChatProvider, ProviderReply, ToolRound, IMAGE_NOT_SUPPORTED};
pub use rules::RuleBasedProvider;
pub use session_provider::{AsyncToolSessionProvider, RemoteLifecycle, DEFAULT_SESSION_DEADLINE_MS};
pub use session_transport::{
    RemoteSession, SessionEvent, SessionEventKind, SessionTransport, StdioSessionTransport,
    StdioTransportConfig,
};
pub use token_cache::{AccessTokenCache, OAuthClientCredentials, DEFAULT_TOKEN_URL, TOKEN_SAFETY_MARGIN_MS};
