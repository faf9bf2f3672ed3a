//! `whispr-whatsapp`: outbound WhatsApp delivery.
//!
//! [`TwilioSender`] implements [`whispr_core::Notifier`] over Twilio's REST
//! API; [`LogSender`] stands in when no credentials are configured.

pub mod split;
pub mod twilio;

pub use split::{split_body, BODY_MAX};
pub use twilio::{whatsapp_address, LogSender, TwilioSender};
