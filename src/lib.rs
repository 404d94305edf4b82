//! # Project Tracker
//!
//! Client-side core of a project management system: projects move through
//! ordered phases, each phase owns tasks, and completion is gated bottom-up.
//!
//! ## Architecture
//!
//! ```text
//!   caller ──► WorkflowService ──(optimistic write)──► EntityCache ──► subscribers
//!                   │   ▲                                   ▲
//!                   │   └──── confirm / rollback-by-reload ─┘
//!                   ▼
//!            WorkflowRemote  (HttpWorkflowRemote | InMemoryWorkflowStore)
//!
//!   PushTransport ──► NotificationChannel ──► NotificationInbox ──► urgent subscribers
//!                          ▲
//!   NotificationFeed ──────┘ (bootstrap, mark_read)
//! ```
//!
//! ## Modules
//! - `workflow`: entities, transition rules, progress, cache and reconciliation
//! - `notifications`: push channel, reconnect policy and the urgent buffer
//! - `events`: subscribe/unsubscribe registry shared by both
//! - `config` / `settings`: environment configuration and persisted policy

pub mod config;
pub mod events;
pub mod notifications;
pub mod settings;
pub mod workflow;

pub use config::{Config, ConfigError};
pub use events::{Listeners, SubscriptionId};
pub use notifications::{NotificationChannel, ReconnectPolicy};
pub use settings::{SettingsStore, WorkflowSettings};
pub use workflow::{WorkflowError, WorkflowPolicy, WorkflowService};
