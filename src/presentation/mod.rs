// Presentation layer - headless HTTP consumer of the link
pub mod app_state;
pub mod handlers;
