//! Bastion Events - typed event stream for the Bastion module runtime.
//!
//! Every component that changes observable state (module lifecycle, policy
//! store, channel log, resource ceilings, marketplace reviews) publishes a
//! [`RuntimeEvent`] on a shared [`EventBus`]. There are two ways to listen:
//!
//! 1. **Async receivers**: `bus.subscribe()` (or `subscribe_types`) returns an
//!    [`EventReceiver`]. Dropping it cancels the subscription.
//!
//! 2. **Synchronous subscribers**: implement [`EventSubscriber`] and register
//!    it with `bus.registry()`. Unregister with the returned [`SubscriberId`].
//!
//! # Example
//!
//! ```rust
//! use bastion_core::ModuleId;
//! use bastion_events::{EventBus, EventMetadata, RuntimeEvent};
//!
//! # async fn example() {
//! let bus = EventBus::new();
//! let mut receiver = bus.subscribe();
//!
//! bus.publish(RuntimeEvent::ModuleStarted {
//!     metadata: EventMetadata::new("runtime"),
//!     module_id: ModuleId::new("greeter").unwrap(),
//! });
//!
//! let event = receiver.recv().await.unwrap();
//! assert_eq!(event.event_type(), "module_started");
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod bus;
mod event;
mod subscriber;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventReceiver};
pub use event::{EventMetadata, RuntimeEvent};
pub use subscriber::{
    EventFilter, EventSubscriber, FilterSubscriber, SubscriberId, SubscriberRegistry,
};
