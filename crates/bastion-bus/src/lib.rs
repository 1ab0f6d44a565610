//! Bastion Bus - permissioned channels between modules.
//!
//! A channel has a creator, a subscriber set, and a bounded message log.
//! Publishing requires membership (creator or subscriber) and the
//! `bus.publish` API grant in the sender's policy. Each published message is
//! appended to the log and pushed into the mailbox of every other
//! subscriber; the runtime drains mailboxes and hands messages to running
//! modules as `channel:<name>` events.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod bus;
mod error;
mod message;

pub use bus::{CommunicationBus, Mailbox};
pub use error::{BusError, BusResult};
pub use message::{ChannelInfo, ChannelMessage, PublishReceipt};
