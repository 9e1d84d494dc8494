//! Core types, config, errors, and the widget store for VoxDeck.

pub mod config;
pub mod error;
pub mod ui_event;
pub mod ui_store;

pub use error::{Result, VoxDeckError};
pub use ui_event::{UiEvent, WidgetKind};
pub use ui_store::{SharedUiStore, UiStore, WidgetItem};
