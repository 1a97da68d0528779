//! Client-side notification subsystem for the storefront.
//!
//! [`usecase::session::NotificationService`] follows the authenticated user,
//! seeds a session-scoped store from the history endpoint and keeps it fresh
//! over a STOMP push channel. Presentation code reads through
//! [`usecase::query::NotificationQuery`] and marks records read through
//! [`usecase::read_state::ReadStateSynchronizer`].

pub mod config;
pub mod delivery;
pub mod domain;
pub mod repository;
pub mod telemetry;
pub mod usecase;
