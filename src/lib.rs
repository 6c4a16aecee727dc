// Supervised streaming telemetry link to an external simulation worker
pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;
