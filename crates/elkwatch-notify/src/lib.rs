//! Webhook notification delivery.
//!
//! Alerts are rendered into an interactive card ([`card`]) and posted to
//! the rule's webhook endpoint with bounded retries ([`webhook`]). The
//! caller owns the overall send budget; this crate owns per-attempt
//! timeouts and backoff.

pub mod card;
pub mod error;
pub mod webhook;

pub use error::NotifyError;
pub use webhook::WebhookNotifier;
