// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Bus message model for payoutd.
//!
//! Inbound requests are parsed and validated here, outbound replies and
//! device events are rendered here. Nothing in this crate talks to a
//! device or to the bus.

pub mod events;
pub mod reply;
pub mod request;
pub mod topics;

pub use events::{translate_event, SideEffect, TranslatedEvent};
pub use reply::{rejection, Correlation};
pub use request::{is_quit, parse_request, Command, CommandMatching, FieldError, Request, RequestError};
pub use topics::{event_topic, response_topic, InboundTopic};
