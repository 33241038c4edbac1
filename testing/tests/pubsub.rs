// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tether_bridge::{
    Client, ClientConfiguration, ClientHandle, NativePushKind, PubSubSubscriptions,
};
use tether_pubsub::{CallbackContext, MessageHandler, PubSubError, PubSubMessage, SubscriberState};
use tether_testing::MockEngine;
use tracing_test::traced_test;

fn news() -> PubSubSubscriptions {
    PubSubSubscriptions {
        channels: vec!["news".to_string()],
        patterns: vec!["sports.*".to_string()],
        sharded_channels: vec!["orders".to_string()],
    }
}

fn connect(engine: &Arc<MockEngine>, config: ClientConfiguration) -> Client {
    Client::connect(
        config.with_address("127.0.0.1:6379").with_subscriptions(news()),
        engine.clone(),
    )
    .unwrap()
}

// waits until the callback thread handled everything published so far
fn flush_callbacks(client: &Client) {
    let id = client.default_subscriber().unwrap();
    let handler = client.dispatcher().handler(id).unwrap();
    assert!(handler.flush(Duration::from_secs(5)));
}

#[test]
fn test_callback_receives_messages() {
    let engine = MockEngine::new();
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let context: CallbackContext = Arc::new("ctx-42".to_string());

    let client = connect(
        &engine,
        ClientConfiguration::new().with_callback(
            move |msg: PubSubMessage, ctx: Option<&CallbackContext>| {
                let tag = ctx
                    .and_then(|c| c.downcast_ref::<String>())
                    .cloned()
                    .unwrap_or_default();
                sink.lock().push((msg, tag));
            },
            Some(context),
        ),
    );

    engine.publish_from_worker(client.handle(), NativePushKind::Message, "news", b"hello", None);
    engine.publish_from_worker(
        client.handle(),
        NativePushKind::PMessage,
        "sports.tennis",
        b"set point",
        Some("sports.*"),
    );
    engine.publish_from_worker(client.handle(), NativePushKind::SMessage, "orders", b"o-1", None);
    flush_callbacks(&client);

    let received = received.lock();
    assert_eq!(received.len(), 3);
    assert_eq!(received[0].0.channel(), "news");
    assert_eq!(received[0].0.payload_str(), Some("hello"));
    assert_eq!(received[0].0.pattern(), None);
    assert_eq!(received[0].1, "ctx-42");
    assert_eq!(received[1].0.pattern(), Some("sports.*"));
    assert_eq!(received[2].0.channel(), "orders");
}

#[test]
fn test_queue_consumption() {
    let engine = MockEngine::new();
    let client = connect(&engine, ClientConfiguration::new());
    let queue = client.message_queue().unwrap();

    thread::scope(|s| {
        let consumer = s.spawn(|| queue.next_message_blocking());
        thread::sleep(Duration::from_millis(10));
        engine.publish(client.handle(), NativePushKind::Message, "news", b"first", None);
        assert_eq!(
            consumer.join().unwrap().unwrap().payload_str(),
            Some("first")
        );
    });

    engine.publish(client.handle(), NativePushKind::Message, "news", b"second", None);
    engine.publish(client.handle(), NativePushKind::Message, "news", b"third", None);
    assert_eq!(queue.len(), 2);
    assert_eq!(queue.pop().unwrap().payload_str(), Some("second"));
    assert_eq!(queue.pop().unwrap().payload_str(), Some("third"));
    assert!(queue.pop().is_none());
}

#[tokio::test]
async fn test_queue_async_consumption() {
    let engine = MockEngine::new();
    let client = connect(&engine, ClientConfiguration::new());
    let queue = client.message_queue().unwrap();

    let (message, _) = tokio::join!(queue.next_message(), async {
        engine.publish(client.handle(), NativePushKind::SMessage, "orders", b"o-7", None);
    });
    assert_eq!(message.unwrap().channel(), "orders");
}

#[test]
fn test_close_releases_blocked_consumer() {
    let engine = MockEngine::new();
    let client = connect(&engine, ClientConfiguration::new());
    let queue = client.message_queue().unwrap();

    thread::scope(|s| {
        let consumer = s.spawn(|| queue.next_message_blocking());
        thread::sleep(Duration::from_millis(10));
        client.close();
        assert_eq!(consumer.join().unwrap(), Err(PubSubError::QueueClosed));
    });

    // pushes after close are dropped
    engine.publish(client.handle(), NativePushKind::Message, "news", b"late", None);
    assert!(queue.is_empty());
}

#[test]
#[traced_test]
fn test_unknown_handle_and_kinds_are_dropped() {
    let engine = MockEngine::new();
    let client = connect(&engine, ClientConfiguration::new());

    engine.publish(
        ClientHandle::from_raw(usize::MAX),
        NativePushKind::Message,
        "news",
        b"lost",
        None,
    );
    assert!(logs_contain("push for unknown client, dropped"));

    engine.publish(client.handle(), NativePushKind::Disconnection, "", b"", None);
    engine.publish(client.handle(), NativePushKind::Invalidate, "", b"", None);
    assert!(logs_contain("non pub/sub push notification, dropped"));

    // acknowledgements do not change subscriptions and deliver nothing
    engine.publish(client.handle(), NativePushKind::Unsubscribe, "news", b"", None);
    assert!(logs_contain("subscription acknowledgement"));

    let queue = client.message_queue().unwrap();
    assert!(queue.is_empty());
    engine.publish(client.handle(), NativePushKind::Message, "news", b"still", None);
    assert_eq!(queue.len(), 1);
}

#[test]
fn test_pattern_and_exact_subscribers() {
    let engine = MockEngine::new();
    let client = connect(&engine, ClientConfiguration::new());
    let dispatcher = client.dispatcher();

    let exact_handler = Arc::new(MessageHandler::with_queue());
    let exact = dispatcher.register_subscriber(exact_handler.clone());
    assert_eq!(dispatcher.subscriber_state(exact), SubscriberState::Idle);
    dispatcher.add_subscription(exact, "news.sports").unwrap();

    let pattern_handler = Arc::new(MessageHandler::with_queue());
    let by_pattern = dispatcher.register_subscriber(pattern_handler.clone());
    dispatcher.add_pattern_subscription(by_pattern, "news.*").unwrap();
    assert_eq!(dispatcher.subscriber_state(by_pattern), SubscriberState::Subscribed);

    // plain message: only the exact subscriber
    engine.publish(client.handle(), NativePushKind::Message, "news.sports", b"m1", None);
    // pattern message: only the pattern subscriber
    engine.publish(
        client.handle(),
        NativePushKind::PMessage,
        "news.sports",
        b"m2",
        Some("news.*"),
    );

    let exact_queue = exact_handler.queue().unwrap();
    let pattern_queue = pattern_handler.queue().unwrap();
    assert_eq!(exact_queue.len(), 1);
    let by_channel_msg = exact_queue.pop().unwrap();
    assert_eq!(by_channel_msg.payload_str(), Some("m1"));
    assert_eq!(by_channel_msg.pattern(), None);
    assert_eq!(pattern_queue.len(), 1);
    let by_pattern_msg = pattern_queue.pop().unwrap();
    assert_eq!(by_pattern_msg.payload_str(), Some("m2"));
    assert_eq!(by_pattern_msg.pattern(), Some("news.*"));

    // the default subscriber saw neither
    assert!(client.message_queue().unwrap().is_empty());

    let purged = dispatcher.unregister_subscriber(by_pattern).unwrap();
    assert_eq!(purged.len(), 1);
    assert_eq!(dispatcher.subscriber_state(by_pattern), SubscriberState::Removed);
    assert!(pattern_queue.is_closed());
    assert_eq!(dispatcher.subscriber_state(exact), SubscriberState::Subscribed);
}

#[test]
#[traced_test]
fn test_panicking_callback_is_contained() {
    let engine = MockEngine::new();
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();

    let client = connect(
        &engine,
        ClientConfiguration::new().with_callback(
            move |msg: PubSubMessage, _ctx: Option<&CallbackContext>| {
                if msg.payload_str() == Some("boom") {
                    panic!("subscriber failure");
                }
                sink.lock().push(msg.payload_str().unwrap_or_default().to_string());
            },
            None,
        ),
    );

    engine.publish(client.handle(), NativePushKind::Message, "news", b"boom", None);
    engine.publish(client.handle(), NativePushKind::Message, "news", b"ok", None);
    flush_callbacks(&client);

    assert_eq!(*received.lock(), vec!["ok".to_string()]);
    assert!(logs_contain("pubsub callback panicked"));
}

#[test]
fn test_blocked_callback_does_not_stall_other_subscribers() {
    let engine = MockEngine::new();
    let (unblock, blocked_on) = std::sync::mpsc::channel::<()>();
    let blocked_on = Mutex::new(blocked_on);
    let received = Arc::new(Mutex::new(0usize));
    let count = received.clone();

    let client = connect(
        &engine,
        ClientConfiguration::new().with_callback(
            move |_msg: PubSubMessage, _ctx: Option<&CallbackContext>| {
                let _ = blocked_on.lock().recv();
                *count.lock() += 1;
            },
            None,
        ),
    );
    let observer = Arc::new(MessageHandler::with_queue());
    let id = client.dispatcher().register_subscriber(observer.clone());
    client.dispatcher().add_subscription(id, "news").unwrap();

    // the native thread is never held up by the stuck callback
    for i in 0..3 {
        engine.publish_from_worker(
            client.handle(),
            NativePushKind::Message,
            "news",
            format!("m{}", i).as_bytes(),
            None,
        );
    }
    assert_eq!(observer.queue().unwrap().len(), 3);
    assert_eq!(*received.lock(), 0);

    for _ in 0..3 {
        unblock.send(()).unwrap();
    }
    flush_callbacks(&client);
    assert_eq!(*received.lock(), 3);
}
