// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Handler registries.
//!
//! Each registry keeps an ordered list of `Arc` handler references per
//! dispatch key. Removal is by pointer identity. Dispatch always
//! iterates over a snapshot taken before the first callback, so a
//! registration removed between dispatches is guaranteed not to run.

use std::collections::HashMap;
use std::sync::Arc;

use crate::handler::{
    ConnectionListener, IqHandler, MessageHandler, PresenceHandler, SubscriptionHandler,
    TagHandler,
};

/// Shorthand for the reference type the registries hold.
type Ref<T> = Arc<T>;

fn remove_by_identity<T: ?Sized>(list: &mut Vec<Ref<T>>, handler: &Ref<T>) {
    list.retain(|entry| !Arc::ptr_eq(entry, handler));
}

/// All handler registrations of one session.
#[derive(Default)]
pub struct Handlers {
    pub(crate) connection: Vec<Ref<dyn ConnectionListener + Send + Sync>>,
    pub(crate) message: Vec<Ref<dyn MessageHandler + Send + Sync>>,
    pub(crate) presence: Vec<Ref<dyn PresenceHandler + Send + Sync>>,
    pub(crate) subscription: Vec<Ref<dyn SubscriptionHandler + Send + Sync>>,
    pub(crate) tag: HashMap<String, Vec<Ref<dyn TagHandler + Send + Sync>>>,
    pub(crate) iq_ns: HashMap<String, Vec<Ref<dyn IqHandler + Send + Sync>>>,
}

impl Handlers {
    /// Registers a connection listener.
    pub fn register_connection_listener(
        &mut self,
        listener: Ref<dyn ConnectionListener + Send + Sync>,
    ) {
        self.connection.push(listener);
    }

    /// Removes a connection listener by identity.
    pub fn remove_connection_listener(
        &mut self,
        listener: &Ref<dyn ConnectionListener + Send + Sync>,
    ) {
        remove_by_identity(&mut self.connection, listener);
    }

    /// Registers a message handler.
    pub fn register_message_handler(&mut self, handler: Ref<dyn MessageHandler + Send + Sync>) {
        self.message.push(handler);
    }

    /// Removes a message handler by identity.
    pub fn remove_message_handler(&mut self, handler: &Ref<dyn MessageHandler + Send + Sync>) {
        remove_by_identity(&mut self.message, handler);
    }

    /// Registers a presence handler.
    pub fn register_presence_handler(&mut self, handler: Ref<dyn PresenceHandler + Send + Sync>) {
        self.presence.push(handler);
    }

    /// Removes a presence handler by identity.
    pub fn remove_presence_handler(&mut self, handler: &Ref<dyn PresenceHandler + Send + Sync>) {
        remove_by_identity(&mut self.presence, handler);
    }

    /// Registers a subscription handler.
    pub fn register_subscription_handler(
        &mut self,
        handler: Ref<dyn SubscriptionHandler + Send + Sync>,
    ) {
        self.subscription.push(handler);
    }

    /// Removes a subscription handler by identity.
    pub fn remove_subscription_handler(
        &mut self,
        handler: &Ref<dyn SubscriptionHandler + Send + Sync>,
    ) {
        remove_by_identity(&mut self.subscription, handler);
    }

    /// Registers a raw tag handler for a root element name.
    pub fn register_tag_handler(
        &mut self,
        name: impl Into<String>,
        handler: Ref<dyn TagHandler + Send + Sync>,
    ) {
        self.tag.entry(name.into()).or_default().push(handler);
    }

    /// Removes a tag handler by identity.
    pub fn remove_tag_handler(&mut self, name: &str, handler: &Ref<dyn TagHandler + Send + Sync>) {
        if let Some(list) = self.tag.get_mut(name) {
            remove_by_identity(list, handler);
            if list.is_empty() {
                self.tag.remove(name);
            }
        }
    }

    /// Registers an IQ handler for a payload namespace.
    pub fn register_iq_handler(
        &mut self,
        namespace: impl Into<String>,
        handler: Ref<dyn IqHandler + Send + Sync>,
    ) {
        self.iq_ns.entry(namespace.into()).or_default().push(handler);
    }

    /// Removes an IQ handler by identity.
    pub fn remove_iq_handler(
        &mut self,
        namespace: &str,
        handler: &Ref<dyn IqHandler + Send + Sync>,
    ) {
        if let Some(list) = self.iq_ns.get_mut(namespace) {
            remove_by_identity(list, handler);
            if list.is_empty() {
                self.iq_ns.remove(namespace);
            }
        }
    }

    pub(crate) fn connection_snapshot(&self) -> Vec<Ref<dyn ConnectionListener + Send + Sync>> {
        self.connection.clone()
    }

    pub(crate) fn message_snapshot(&self) -> Vec<Ref<dyn MessageHandler + Send + Sync>> {
        self.message.clone()
    }

    pub(crate) fn presence_snapshot(&self) -> Vec<Ref<dyn PresenceHandler + Send + Sync>> {
        self.presence.clone()
    }

    pub(crate) fn subscription_snapshot(&self) -> Vec<Ref<dyn SubscriptionHandler + Send + Sync>> {
        self.subscription.clone()
    }

    pub(crate) fn tag_snapshot(&self, name: &str) -> Vec<Ref<dyn TagHandler + Send + Sync>> {
        self.tag.get(name).cloned().unwrap_or_default()
    }

    pub(crate) fn iq_ns_snapshot(&self, namespace: &str) -> Vec<Ref<dyn IqHandler + Send + Sync>> {
        self.iq_ns.get(namespace).cloned().unwrap_or_default()
    }
}
