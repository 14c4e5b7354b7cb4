/*!
CHANGE DISPATCHER - Notifications vers les observateurs du client

RÔLE :
Trois signaux distincts, enregistrables / désenregistrables indépendamment :
- `ProbeCompleted` : topologie construite (sans payload)
- `ItemChanged` : un data item a reçu un nouvel échantillon (payload = le DataItem)
- `ItemsChanged` : fin d'un lot non vide (sans payload), toujours émis en dernier

Les observateurs sont appelés de manière synchrone dans la tâche de polling ;
`event_channel` fournit un adaptateur mpsc pour les consommateurs asynchrones.
*/

use crate::model::DataItem;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    ProbeCompleted,
    ItemChanged,
    ItemsChanged,
}

/// Événement possédé, tel que livré par `event_channel`
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    ProbeCompleted,
    ItemChanged(DataItem),
    ItemsChanged,
}

/// Abonnement mpsc aux trois signaux
pub struct EventChannel {
    pub receiver: mpsc::UnboundedReceiver<ClientEvent>,
    pub subscriptions: [SubscriptionId; 3],
}

type SignalObserver = Box<dyn FnMut() + Send>;
type ItemObserver = Box<dyn FnMut(&DataItem) + Send>;

#[derive(Default)]
pub struct ChangeDispatcher {
    next_id: u64,
    probe_completed: Vec<(SubscriptionId, SignalObserver)>,
    item_changed: Vec<(SubscriptionId, ItemObserver)>,
    items_changed: Vec<(SubscriptionId, SignalObserver)>,
}

impl std::fmt::Debug for ChangeDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeDispatcher")
            .field("probe_completed", &self.probe_completed.len())
            .field("item_changed", &self.item_changed.len())
            .field("items_changed", &self.items_changed.len())
            .finish()
    }
}

impl ChangeDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> SubscriptionId {
        self.next_id += 1;
        SubscriptionId(self.next_id)
    }

    pub fn on_probe_completed<F>(&mut self, observer: F) -> SubscriptionId
    where
        F: FnMut() + Send + 'static,
    {
        let id = self.allocate_id();
        self.probe_completed.push((id, Box::new(observer)));
        id
    }

    pub fn on_item_changed<F>(&mut self, observer: F) -> SubscriptionId
    where
        F: FnMut(&DataItem) + Send + 'static,
    {
        let id = self.allocate_id();
        self.item_changed.push((id, Box::new(observer)));
        id
    }

    pub fn on_items_changed<F>(&mut self, observer: F) -> SubscriptionId
    where
        F: FnMut() + Send + 'static,
    {
        let id = self.allocate_id();
        self.items_changed.push((id, Box::new(observer)));
        id
    }

    /// Retire un observateur, quel que soit son type ; `false` si l'id est inconnu
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observer_count();
        self.probe_completed.retain(|(sid, _)| *sid != id);
        self.item_changed.retain(|(sid, _)| *sid != id);
        self.items_changed.retain(|(sid, _)| *sid != id);
        self.observer_count() < before
    }

    pub fn observers_of(&self, kind: NotificationKind) -> usize {
        match kind {
            NotificationKind::ProbeCompleted => self.probe_completed.len(),
            NotificationKind::ItemChanged => self.item_changed.len(),
            NotificationKind::ItemsChanged => self.items_changed.len(),
        }
    }

    fn observer_count(&self) -> usize {
        self.probe_completed.len() + self.item_changed.len() + self.items_changed.len()
    }

    /// Branche les trois signaux sur un canal non borné ; un récepteur fermé est ignoré
    pub fn event_channel(&mut self) -> EventChannel {
        let (tx, receiver) = mpsc::unbounded_channel();

        let probe_tx = tx.clone();
        let probe = self.on_probe_completed(move || {
            let _ = probe_tx.send(ClientEvent::ProbeCompleted);
        });
        let item_tx = tx.clone();
        let item = self.on_item_changed(move |data_item| {
            let _ = item_tx.send(ClientEvent::ItemChanged(data_item.clone()));
        });
        let items = self.on_items_changed(move || {
            let _ = tx.send(ClientEvent::ItemsChanged);
        });

        EventChannel {
            receiver,
            subscriptions: [probe, item, items],
        }
    }

    pub(crate) fn probe_completed(&mut self) {
        for (_, observer) in self.probe_completed.iter_mut() {
            observer();
        }
    }

    pub(crate) fn item_changed(&mut self, item: &DataItem) {
        for (_, observer) in self.item_changed.iter_mut() {
            observer(item);
        }
    }

    pub(crate) fn items_changed(&mut self) {
        for (_, observer) in self.items_changed.iter_mut() {
            observer();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_observers_are_called_per_kind() {
        let mut dispatcher = ChangeDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = seen.clone();
        dispatcher.on_item_changed(move |item| log.lock().unwrap().push(format!("item:{}", item.id)));
        let log = seen.clone();
        dispatcher.on_items_changed(move || log.lock().unwrap().push("batch".to_string()));

        dispatcher.item_changed(&DataItem::new("a"));
        dispatcher.item_changed(&DataItem::new("b"));
        dispatcher.items_changed();
        dispatcher.probe_completed();

        assert_eq!(*seen.lock().unwrap(), vec!["item:a", "item:b", "batch"]);
    }

    #[test]
    fn test_unsubscribe_only_removes_target() {
        let mut dispatcher = ChangeDispatcher::new();
        let count = Arc::new(Mutex::new(0));

        let c = count.clone();
        let first = dispatcher.on_items_changed(move || *c.lock().unwrap() += 1);
        let c = count.clone();
        dispatcher.on_items_changed(move || *c.lock().unwrap() += 10);

        assert!(dispatcher.unsubscribe(first));
        assert!(!dispatcher.unsubscribe(first));
        dispatcher.items_changed();

        assert_eq!(*count.lock().unwrap(), 10);
        assert_eq!(dispatcher.observers_of(NotificationKind::ItemsChanged), 1);
    }

    #[tokio::test]
    async fn test_event_channel_preserves_order() {
        let mut dispatcher = ChangeDispatcher::new();
        let mut channel = dispatcher.event_channel();

        dispatcher.probe_completed();
        dispatcher.item_changed(&DataItem::new("xpos"));
        dispatcher.items_changed();

        assert_eq!(channel.receiver.recv().await, Some(ClientEvent::ProbeCompleted));
        match channel.receiver.recv().await {
            Some(ClientEvent::ItemChanged(item)) => assert_eq!(item.id, "xpos"),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(channel.receiver.recv().await, Some(ClientEvent::ItemsChanged));

        for id in channel.subscriptions {
            assert!(dispatcher.unsubscribe(id));
        }
        assert_eq!(dispatcher.observers_of(NotificationKind::ItemChanged), 0);
    }
}
