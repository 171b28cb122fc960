//! HTTP control plane for a running bot: health, connection status, the
//! pending QR artifact and a live provider event stream.

pub mod api;
pub mod app_state;
pub mod config;

pub use api::{build_router, serve};
pub use app_state::{AppState, PendingAction, StatusSnapshot};
pub use config::{load_settings, Settings, DEFAULT_SETTINGS_FILE};
