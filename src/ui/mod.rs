//! UI-facing surface: the event model the orchestrator reports through.

pub mod notify;

pub use notify::{Notification, NotifyLevel, Popup, UiEvent, UiSink};
