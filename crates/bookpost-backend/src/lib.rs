//! Backend runtime entry point and public API surface.
//!
//! This crate answers the commands of delivery clients: it downloads the
//! requested books, mails them over SMTP or into a pickup directory and reports every
//! step on the shared event stream.

mod app;
pub mod config;
mod formatting;
mod mailer;
mod runtime;
mod services;
mod source;
mod state;
mod tracker;

pub use crate::runtime::{run, serve};
