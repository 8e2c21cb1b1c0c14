mod helpers;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use correio_core::{
    CancelSource, Message, MqConfig, PubSubReceiver, PubSubSender, RegistryMonitor, Store,
    SubscriberRegistry,
};

fn registry(store: &Arc<correio_core::MemoryStore>) -> Arc<SubscriberRegistry> {
    Arc::new(SubscriberRegistry::new(store.clone() as Arc<dyn Store>))
}

/// One send, K live subscribers, K private copies — and every subscriber's
/// pool drains its own copy.
#[test]
fn fan_out_reaches_every_subscriber() {
    let store = helpers::test_store();
    let registry = registry(&store);

    let mut receivers = Vec::new();
    let mut inboxes = Vec::new();
    let cancel = CancelSource::new();
    for _ in 0..3 {
        let receiver = PubSubReceiver::new(
            store.clone(),
            Arc::clone(&registry),
            "ticks",
            helpers::test_config(),
        )
        .unwrap();
        let inbox: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&inbox);
        receiver.start_receiving(
            1,
            move |msg| {
                sink.lock().unwrap().push(msg.text.clone().unwrap_or_default());
                Ok(())
            },
            cancel.token(),
        );
        receivers.push(receiver);
        inboxes.push(inbox);
    }

    let sender = PubSubSender::new(store, Arc::clone(&registry), "ticks").unwrap();
    for n in 0..5 {
        let copies = sender.send(&Message::with_text(format!("ps-{n}"))).unwrap();
        assert_eq!(copies, 3);
    }

    assert!(
        helpers::wait_until(Duration::from_secs(10), || {
            inboxes.iter().all(|inbox| inbox.lock().unwrap().len() == 5)
        }),
        "every subscriber should see all five messages"
    );

    cancel.cancel();
    for mut receiver in receivers {
        receiver.stop();
    }
}

/// No retroactive delivery: a subscriber created after a send never sees it.
#[test]
fn late_subscriber_misses_earlier_sends() {
    let store = helpers::test_store();
    let registry = registry(&store);

    let early = PubSubReceiver::new(
        store.clone(),
        Arc::clone(&registry),
        "ticks",
        helpers::test_config(),
    )
    .unwrap();

    let sender = PubSubSender::new(store.clone(), Arc::clone(&registry), "ticks").unwrap();
    assert_eq!(sender.send(&Message::with_text("first")).unwrap(), 1);

    let late = PubSubReceiver::new(
        store,
        Arc::clone(&registry),
        "ticks",
        helpers::test_config(),
    )
    .unwrap();
    assert_eq!(sender.send(&Message::with_text("second")).unwrap(), 2);

    assert_eq!(early.count_pending().unwrap(), 2);
    assert_eq!(late.count_pending().unwrap(), 1, "no retroactive delivery");
}

/// A subscriber that stops pinging is garbage-collected: registry entry and
/// private queue both go, and later sends no longer produce a copy for it.
#[test]
fn stale_subscriber_is_garbage_collected() {
    let store = helpers::test_store();
    let reg = registry(&store);
    let config = MqConfig {
        need_pubsub_ping_seconds: 1,
        pubsub_poll_every_ms: 50,
        first_pubsub_poll_after_ms: 10,
        pubsub_keepalive_every_ms: 50,
        ..helpers::test_config()
    };

    let mut silent =
        PubSubReceiver::new(store.clone(), Arc::clone(&reg), "ticks", config.clone()).unwrap();
    let private_queue = silent.queue().collection().to_string();

    let monitor = RegistryMonitor::start(Arc::clone(&reg), &config);

    // Stop the subscriber: its keepalive goes quiet, its registration lapses.
    silent.stop();

    assert!(
        helpers::wait_until(Duration::from_secs(10), || {
            reg.subscribers("ticks").is_empty()
        }),
        "stale subscriber should be expired"
    );
    assert!(
        helpers::wait_until(Duration::from_secs(5), || {
            !store
                .collection_names()
                .unwrap()
                .contains(&private_queue)
        }),
        "private queue should be dropped"
    );

    let sender = PubSubSender::new(store.clone(), Arc::clone(&reg), "ticks").unwrap();
    assert_eq!(
        sender.send(&Message::with_text("to nobody")).unwrap(),
        0,
        "no copies for a collected subscriber"
    );

    monitor.stop();
}

/// Keepalives hold a subscriber in the registry well past the liveness
/// threshold while the monitor runs.
#[test]
fn live_subscriber_survives_the_monitor() {
    let store = helpers::test_store();
    let reg = registry(&store);
    let config = MqConfig {
        need_pubsub_ping_seconds: 1,
        pubsub_poll_every_ms: 50,
        first_pubsub_poll_after_ms: 10,
        pubsub_keepalive_every_ms: 50,
        ..helpers::test_config()
    };

    let receiver =
        PubSubReceiver::new(store, Arc::clone(&reg), "ticks", config.clone()).unwrap();
    let monitor = RegistryMonitor::start(Arc::clone(&reg), &config);

    // Outlive the liveness threshold with the keepalive running
    std::thread::sleep(Duration::from_millis(1500));
    assert_eq!(reg.subscribers("ticks"), vec![receiver.subscriber_id()]);

    monitor.stop();
}
