//! Headless models of the three window surfaces.
//!
//! Each surface owns its own settings cache and listens on the shared
//! notifier, the way separate webview windows would.

mod options;
mod spotlight;
mod toast;

pub use options::OptionsSurface;
pub use spotlight::{SpotlightSurface, COPIED_TOAST_MESSAGE};
pub use toast::ToastSurface;
