use crate::observer::{Subscribers, Subscription};
use crate::store::ProfileStore;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const THEME_PREFERENCE: &str = "theme";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    pub fn parse(value: &str) -> Option<Theme> {
        match value {
            "light" => Some(Theme::Light),
            "dark" => Some(Theme::Dark),
            _ => None,
        }
    }
}

/// Stand-in for the document root: the dark-mode flag rendering layers read.
#[derive(Clone, Default)]
pub struct DocumentState {
    dark: Arc<AtomicBool>,
}

impl DocumentState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dark_mode(&self) -> bool {
        self.dark.load(Ordering::Relaxed)
    }

    fn set_dark(&self, on: bool) {
        self.dark.store(on, Ordering::Relaxed);
    }
}

/// Host capability reporting the system-wide theme preference, when the
/// platform exposes one.
pub type SystemThemeProbe = Arc<dyn Fn() -> Option<Theme> + Send + Sync>;

/// Theme preference store.
///
/// Resolution order on startup: persisted preference, then the system
/// probe, then light. Persistence failures are swallowed; the theme still
/// applies for the session.
#[derive(Clone)]
pub struct ThemeStore {
    current: Arc<RwLock<Theme>>,
    store: ProfileStore,
    document: DocumentState,
    subscribers: Subscribers<Theme>,
}

impl ThemeStore {
    pub fn new(
        store: ProfileStore,
        document: DocumentState,
        system: Option<SystemThemeProbe>,
    ) -> Self {
        let initial = store
            .preference(THEME_PREFERENCE)
            .and_then(|value| Theme::parse(&value))
            .or_else(|| system.as_ref().and_then(|probe| probe()))
            .unwrap_or_default();
        document.set_dark(initial == Theme::Dark);
        Self {
            current: Arc::new(RwLock::new(initial)),
            store,
            document,
            subscribers: Subscribers::new(),
        }
    }

    pub fn get(&self) -> Theme {
        *self.current.read()
    }

    pub fn set(&self, theme: Theme) {
        *self.current.write() = theme;
        if let Err(err) = self.store.set_preference(THEME_PREFERENCE, theme.as_str()) {
            tracing::debug!(%err, "theme preference not persisted");
        }
        self.document.set_dark(theme == Theme::Dark);
        self.subscribers.notify(&theme);
    }

    pub fn subscribe(&self, callback: impl Fn(&Theme) + Send + Sync + 'static) -> Subscription {
        self.subscribers.subscribe(callback)
    }
}
