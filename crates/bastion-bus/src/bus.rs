//! Named channels with membership, a bounded message log, and per-module
//! mailboxes.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bastion_config::BusSection;
use bastion_core::ModuleId;
use bastion_events::{EventBus, EventMetadata, RuntimeEvent};
use bastion_policy::{PUBLISH_API, PolicyManager};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{BusError, BusResult};
use crate::message::{ChannelInfo, ChannelMessage, PublishReceipt};

const EVENT_SOURCE: &str = "bus";

/// Receiving half of a module's mailbox.
pub type Mailbox = mpsc::UnboundedReceiver<Arc<ChannelMessage>>;

#[derive(Debug)]
struct Channel {
    creator: ModuleId,
    subscribers: BTreeSet<ModuleId>,
    log: VecDeque<Arc<ChannelMessage>>,
}

impl Channel {
    fn is_member(&self, id: &ModuleId) -> bool {
        self.creator == *id || self.subscribers.contains(id)
    }
}

/// Permissioned publish/subscribe between modules.
///
/// Channel state lives behind one lock that is never held across an await;
/// delivery is a non-blocking push into each recipient's unbounded mailbox,
/// drained by the runtime's per-module pump.
#[derive(Debug)]
pub struct CommunicationBus {
    channels: RwLock<HashMap<String, Channel>>,
    mailboxes: DashMap<ModuleId, mpsc::UnboundedSender<Arc<ChannelMessage>>>,
    policies: Arc<PolicyManager>,
    events: EventBus,
    log_capacity: usize,
}

fn validate_name(name: &str) -> BusResult<()> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(BusError::InvalidChannelName(name.to_owned()));
    }
    Ok(())
}

impl CommunicationBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new(policies: Arc<PolicyManager>, events: EventBus, settings: &BusSection) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            mailboxes: DashMap::new(),
            policies,
            events,
            log_capacity: settings.message_log_capacity.max(1),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Channel>> {
        self.channels.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Channel>> {
        self.channels.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the mailbox for `id`, replacing any previous one.
    ///
    /// Messages published to channels `id` subscribes to arrive on the
    /// returned receiver.
    pub fn attach(&self, id: &ModuleId) -> Mailbox {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.mailboxes.insert(id.clone(), tx).is_some() {
            debug!(module_id = %id, "Replaced existing mailbox");
        }
        rx
    }

    /// Close the mailbox for `id` and drop it from every subscriber set.
    /// Channels it created are kept.
    pub fn detach(&self, id: &ModuleId) {
        self.mailboxes.remove(id);
        let mut channels = self.write();
        for channel in channels.values_mut() {
            channel.subscribers.remove(id);
        }
        debug!(module_id = %id, "Detached from bus");
    }

    /// Whether `id` currently has an open mailbox.
    #[must_use]
    pub fn is_attached(&self, id: &ModuleId) -> bool {
        self.mailboxes.contains_key(id)
    }

    /// Create a channel owned by `creator`.
    ///
    /// # Errors
    ///
    /// - [`BusError::InvalidChannelName`] for empty or whitespace names.
    /// - [`BusError::ChannelExists`] if the name is taken.
    pub fn create_channel(&self, name: &str, creator: &ModuleId) -> BusResult<()> {
        validate_name(name)?;
        let mut channels = self.write();
        if channels.contains_key(name) {
            return Err(BusError::ChannelExists(name.to_owned()));
        }
        channels.insert(
            name.to_owned(),
            Channel {
                creator: creator.clone(),
                subscribers: BTreeSet::new(),
                log: VecDeque::new(),
            },
        );
        info!(channel = name, creator = %creator, "Channel created");
        Ok(())
    }

    /// Remove a channel and its log. Only the creator may delete it.
    ///
    /// # Errors
    ///
    /// [`BusError::ChannelNotFound`] or [`BusError::PermissionDenied`].
    pub fn delete_channel(&self, requester: &ModuleId, name: &str) -> BusResult<()> {
        let mut channels = self.write();
        let channel = channels
            .get(name)
            .ok_or_else(|| BusError::ChannelNotFound(name.to_owned()))?;
        if channel.creator != *requester {
            return Err(BusError::PermissionDenied {
                module_id: requester.clone(),
                action: "delete",
                channel: name.to_owned(),
            });
        }
        channels.remove(name);
        info!(channel = name, "Channel deleted");
        Ok(())
    }

    /// Add `id` to the channel's subscribers. Subscribing twice is a no-op.
    ///
    /// # Errors
    ///
    /// [`BusError::ChannelNotFound`].
    pub fn subscribe(&self, id: &ModuleId, name: &str) -> BusResult<()> {
        let mut channels = self.write();
        let channel = channels
            .get_mut(name)
            .ok_or_else(|| BusError::ChannelNotFound(name.to_owned()))?;
        if channel.subscribers.insert(id.clone()) {
            debug!(module_id = %id, channel = name, "Subscribed");
        }
        Ok(())
    }

    /// Remove `id` from the channel's subscribers. Unsubscribing a
    /// non-subscriber is a no-op.
    ///
    /// # Errors
    ///
    /// [`BusError::ChannelNotFound`].
    pub fn unsubscribe(&self, id: &ModuleId, name: &str) -> BusResult<()> {
        let mut channels = self.write();
        let channel = channels
            .get_mut(name)
            .ok_or_else(|| BusError::ChannelNotFound(name.to_owned()))?;
        if channel.subscribers.remove(id) {
            debug!(module_id = %id, channel = name, "Unsubscribed");
        }
        Ok(())
    }

    /// Append a message to the channel log and push it to every other
    /// subscriber's mailbox.
    ///
    /// Recipients without an open mailbox are listed as undelivered in the
    /// receipt; the message still lands in the log.
    ///
    /// # Errors
    ///
    /// Checked in order:
    /// - [`BusError::ChannelNotFound`]
    /// - [`BusError::NotSubscribed`] if `sender` is neither creator nor subscriber
    /// - [`BusError::PermissionDenied`] if the sender's policy does not allow
    ///   [`PUBLISH_API`]
    pub fn publish(
        &self,
        sender: &ModuleId,
        name: &str,
        payload: serde_json::Value,
    ) -> BusResult<PublishReceipt> {
        let (message, recipients) = {
            let mut channels = self.write();
            let channel = channels
                .get_mut(name)
                .ok_or_else(|| BusError::ChannelNotFound(name.to_owned()))?;
            if !channel.is_member(sender) {
                return Err(BusError::NotSubscribed {
                    module_id: sender.clone(),
                    channel: name.to_owned(),
                });
            }
            if !self.policies.is_api_allowed(sender, PUBLISH_API) {
                return Err(BusError::PermissionDenied {
                    module_id: sender.clone(),
                    action: "publish",
                    channel: name.to_owned(),
                });
            }

            let message = Arc::new(ChannelMessage::new(name, sender.clone(), payload));
            channel.log.push_back(Arc::clone(&message));
            while channel.log.len() > self.log_capacity {
                channel.log.pop_front();
            }
            let recipients: Vec<ModuleId> = channel
                .subscribers
                .iter()
                .filter(|s| *s != sender)
                .cloned()
                .collect();
            (message, recipients)
        };

        let mut receipt = PublishReceipt {
            message_id: message.id,
            delivered_to: Vec::with_capacity(recipients.len()),
            undelivered: Vec::new(),
        };
        for recipient in recipients {
            let sent = self
                .mailboxes
                .get(&recipient)
                .is_some_and(|tx| tx.send(Arc::clone(&message)).is_ok());
            if sent {
                receipt.delivered_to.push(recipient);
            } else {
                warn!(
                    channel = name,
                    recipient = %recipient,
                    "Recipient has no open mailbox, message not delivered"
                );
                receipt.undelivered.push(recipient);
            }
        }

        debug!(
            channel = name,
            sender = %sender,
            message_id = %message.id,
            delivered = receipt.delivered_to.len(),
            "Message published"
        );
        self.events.publish(RuntimeEvent::MessagePublished {
            metadata: EventMetadata::new(EVENT_SOURCE),
            message_id: message.id,
            channel: name.to_owned(),
            sender: sender.clone(),
            recipients: receipt.delivered_to.len(),
        });
        Ok(receipt)
    }

    /// The channel's log, oldest first. Members only.
    ///
    /// # Errors
    ///
    /// [`BusError::ChannelNotFound`] or [`BusError::PermissionDenied`].
    pub fn get_messages(
        &self,
        requester: &ModuleId,
        name: &str,
    ) -> BusResult<Vec<Arc<ChannelMessage>>> {
        let channels = self.read();
        let channel = channels
            .get(name)
            .ok_or_else(|| BusError::ChannelNotFound(name.to_owned()))?;
        if !channel.is_member(requester) {
            return Err(BusError::PermissionDenied {
                module_id: requester.clone(),
                action: "read",
                channel: name.to_owned(),
            });
        }
        Ok(channel.log.iter().cloned().collect())
    }

    /// Empty the channel's log. Creator only. Returns the number of
    /// messages removed.
    ///
    /// # Errors
    ///
    /// [`BusError::ChannelNotFound`] or [`BusError::PermissionDenied`].
    pub fn clear_channel(&self, requester: &ModuleId, name: &str) -> BusResult<usize> {
        let mut channels = self.write();
        let channel = channels
            .get_mut(name)
            .ok_or_else(|| BusError::ChannelNotFound(name.to_owned()))?;
        if channel.creator != *requester {
            return Err(BusError::PermissionDenied {
                module_id: requester.clone(),
                action: "clear",
                channel: name.to_owned(),
            });
        }
        let cleared = channel.log.len();
        channel.log.clear();
        info!(channel = name, cleared, "Channel cleared");
        Ok(cleared)
    }

    /// Summary of every channel, ordered by name.
    #[must_use]
    pub fn list_channels(&self) -> Vec<ChannelInfo> {
        let channels = self.read();
        let mut infos: Vec<_> = channels
            .iter()
            .map(|(name, c)| ChannelInfo {
                name: name.clone(),
                creator: c.creator.clone(),
                subscribers: c.subscribers.iter().cloned().collect(),
                message_count: c.log.len(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Channels `id` is subscribed to, ordered by name.
    #[must_use]
    pub fn subscriptions(&self, id: &ModuleId) -> Vec<String> {
        let channels = self.read();
        let mut names: Vec<_> = channels
            .iter()
            .filter(|(_, c)| c.subscribers.contains(id))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_policy::{PolicyDefaults, PolicyPatch};
    use serde_json::json;

    fn id(s: &str) -> ModuleId {
        ModuleId::new(s).unwrap()
    }

    fn bus_with(capacity: usize) -> (CommunicationBus, Arc<PolicyManager>, EventBus) {
        let events = EventBus::new();
        let policies = Arc::new(PolicyManager::new(PolicyDefaults::default(), events.clone()));
        let settings = BusSection {
            message_log_capacity: capacity,
            ..BusSection::default()
        };
        let bus = CommunicationBus::new(Arc::clone(&policies), events.clone(), &settings);
        (bus, policies, events)
    }

    fn allow_publish(policies: &PolicyManager, m: &ModuleId) {
        policies
            .set_policy(m, PolicyPatch::default().with_allowed_apis([PUBLISH_API]))
            .unwrap();
    }

    #[test]
    fn publish_delivers_to_subscriber_and_logs_once() {
        let (bus, policies, events) = bus_with(10);
        let (a, b) = (id("mod-a"), id("mod-b"));
        allow_publish(&policies, &a);
        let mut mailbox = bus.attach(&b);
        let mut rx = events.subscribe_types(["message_published"]);

        bus.create_channel("updates", &a).unwrap();
        bus.subscribe(&b, "updates").unwrap();
        let receipt = bus.publish(&a, "updates", json!({"n": 1})).unwrap();

        assert_eq!(receipt.delivered_to, vec![b.clone()]);
        assert!(receipt.undelivered.is_empty());
        let got = mailbox.try_recv().unwrap();
        assert_eq!(got.payload, json!({"n": 1}));
        assert_eq!(got.sender, a);
        assert_eq!(bus.get_messages(&a, "updates").unwrap().len(), 1);
        assert!(rx.try_recv().is_some());
    }

    #[test]
    fn non_member_publish_is_not_subscribed() {
        let (bus, policies, _) = bus_with(10);
        let (a, c) = (id("mod-a"), id("mod-c"));
        allow_publish(&policies, &c);
        bus.create_channel("updates", &a).unwrap();

        let err = bus.publish(&c, "updates", json!(null)).unwrap_err();
        assert!(matches!(err, BusError::NotSubscribed { .. }));
        assert!(bus.get_messages(&a, "updates").unwrap().is_empty());
    }

    #[test]
    fn publish_without_permission_is_denied() {
        let (bus, _, _) = bus_with(10);
        let a = id("mod-a");
        bus.create_channel("updates", &a).unwrap();

        let err = bus.publish(&a, "updates", json!(null)).unwrap_err();
        assert!(matches!(err, BusError::PermissionDenied { action: "publish", .. }));
    }

    #[test]
    fn missing_channel_is_reported_first() {
        let (bus, _, _) = bus_with(10);
        let a = id("mod-a");
        assert_eq!(
            bus.publish(&a, "nope", json!(null)).unwrap_err(),
            BusError::ChannelNotFound("nope".into())
        );
        assert!(bus.subscribe(&a, "nope").is_err());
        assert!(bus.unsubscribe(&a, "nope").is_err());
    }

    #[test]
    fn duplicate_and_invalid_names() {
        let (bus, _, _) = bus_with(10);
        let a = id("mod-a");
        bus.create_channel("updates", &a).unwrap();
        assert_eq!(
            bus.create_channel("updates", &a).unwrap_err(),
            BusError::ChannelExists("updates".into())
        );
        assert!(matches!(
            bus.create_channel("has space", &a),
            Err(BusError::InvalidChannelName(_))
        ));
    }

    #[test]
    fn subscription_is_idempotent() {
        let (bus, _, _) = bus_with(10);
        let (a, b) = (id("mod-a"), id("mod-b"));
        bus.create_channel("updates", &a).unwrap();
        bus.subscribe(&b, "updates").unwrap();
        bus.subscribe(&b, "updates").unwrap();
        assert_eq!(bus.list_channels()[0].subscribers, vec![b.clone()]);
        bus.unsubscribe(&b, "updates").unwrap();
        bus.unsubscribe(&b, "updates").unwrap();
        assert!(bus.list_channels()[0].subscribers.is_empty());
    }

    #[test]
    fn only_creator_may_clear_or_delete() {
        let (bus, policies, _) = bus_with(10);
        let (a, b) = (id("mod-a"), id("mod-b"));
        allow_publish(&policies, &a);
        bus.create_channel("updates", &a).unwrap();
        bus.subscribe(&b, "updates").unwrap();
        bus.publish(&a, "updates", json!(1)).unwrap();

        assert!(bus.get_messages(&b, "updates").is_ok());
        assert!(matches!(
            bus.clear_channel(&b, "updates"),
            Err(BusError::PermissionDenied { action: "clear", .. })
        ));
        assert_eq!(bus.clear_channel(&a, "updates").unwrap(), 1);
        assert!(bus.delete_channel(&b, "updates").is_err());
        bus.delete_channel(&a, "updates").unwrap();
        assert!(bus.list_channels().is_empty());
    }

    #[test]
    fn log_evicts_oldest_past_capacity() {
        let (bus, policies, _) = bus_with(2);
        let a = id("mod-a");
        allow_publish(&policies, &a);
        bus.create_channel("updates", &a).unwrap();
        for n in 0..3 {
            bus.publish(&a, "updates", json!(n)).unwrap();
        }
        let payloads: Vec<_> = bus
            .get_messages(&a, "updates")
            .unwrap()
            .iter()
            .map(|m| m.payload.clone())
            .collect();
        assert_eq!(payloads, vec![json!(1), json!(2)]);
    }

    #[test]
    fn unattached_subscriber_is_undelivered() {
        let (bus, policies, _) = bus_with(10);
        let (a, b) = (id("mod-a"), id("mod-b"));
        allow_publish(&policies, &a);
        bus.create_channel("updates", &a).unwrap();
        bus.subscribe(&b, "updates").unwrap();

        let receipt = bus.publish(&a, "updates", json!(1)).unwrap();
        assert!(receipt.delivered_to.is_empty());
        assert_eq!(receipt.undelivered, vec![b]);
    }

    #[test]
    fn detach_drops_subscriptions() {
        let (bus, _, _) = bus_with(10);
        let (a, b) = (id("mod-a"), id("mod-b"));
        let _mailbox = bus.attach(&b);
        bus.create_channel("updates", &a).unwrap();
        bus.subscribe(&b, "updates").unwrap();
        assert_eq!(bus.subscriptions(&b), vec!["updates".to_owned()]);

        bus.detach(&b);
        assert!(!bus.is_attached(&b));
        assert!(bus.subscriptions(&b).is_empty());
    }
}
