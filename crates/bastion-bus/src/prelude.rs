//! Prelude module - commonly used types for convenient import.
//!
//! Use `use bastion_bus::prelude::*;` to import all essential types.

pub use crate::{ChannelMessage, CommunicationBus, Mailbox, PublishReceipt};

pub use crate::{BusError, BusResult};
