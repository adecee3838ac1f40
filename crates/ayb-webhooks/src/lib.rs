//! C10 — Webhook Dispatcher: matches committed row-change `Event`s against
//! registered webhooks, delivers them with HMAC signing and fixed-delay
//! retries, and persists one `Delivery` row per attempt.

pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod model;
pub mod pruner;
pub mod signing;
pub mod state;

pub use error::WebhooksError;
pub use model::{Delivery, DeliveryPage, Webhook, WebhookInput, WebhookPatch, WebhookResponse};
pub use state::WebhooksState;
