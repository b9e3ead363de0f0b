pub mod api;
pub mod chat;
pub mod config;
pub mod observer;
pub mod session;
pub mod store;
pub mod telemetry;
pub mod theme;

pub use api::{ApiClient, ApiError, Navigator, NoopNavigator, ReqwestTransport, RestTransport};
pub use chat::{ChatMessage, ChatState, ChatStore, ChatTransport, WsTransport};
pub use config::{ClientConfig, ConfigError};
pub use observer::{Subscribers, Subscription};
pub use session::{AuthOutcome, Session, SessionStore, UserProfile};
pub use store::ProfileStore;
pub use theme::{Theme, ThemeStore};
