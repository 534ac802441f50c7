//! End-to-end delivery scenarios -- pub-sub, retry, attempt limits,
//! expiry, restart durability, and fan-out -- exercised through the
//! public `Manager`/`Topic<T>`/`Channel<T>` surface rather than any
//! internal module.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use depot::{ChannelOption, HandlerError, Manager, Message, RetryError, TerminalError, TopicOption};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Order {
    name: String,
}

fn wait_until(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

#[test]
fn basic_pub_sub_delivers_once_and_drains_depth() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Manager::new(dir.path());
    let topic = manager.get_or_create_typed_topic::<Order>(TopicOption::new("orders"));
    let mut opt = ChannelOption::new("c");
    opt.max_attempts = 3;
    let channel = topic.get_or_create_channel(opt).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen2 = seen.clone();
    channel.do_(move |_m: &Message, v: Order| -> Result<(), HandlerError> {
        seen2.lock().unwrap().push(v);
        Ok(())
    });

    topic.put(&Order { name: "a".to_string() });

    assert!(wait_until(|| topic.depth() == 0, Duration::from_secs(2)));
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].name, "a");

    manager.close();
}

#[test]
fn retry_with_delay_invokes_three_times_then_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Manager::new(dir.path());
    let topic = manager.get_or_create_typed_topic::<Order>(TopicOption::new("orders"));
    let channel = topic.get_or_create_channel(ChannelOption::new("c")).unwrap();

    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts2 = attempts.clone();
    channel.do_(move |_m: &Message, _v: Order| -> Result<(), HandlerError> {
        let n = attempts2.fetch_add(1, Ordering::SeqCst);
        if n < 2 {
            Err(Box::new(RetryError::new("not yet", Duration::from_millis(50))) as HandlerError)
        } else {
            Ok(())
        }
    });

    topic.put(&Order { name: "a".to_string() });

    assert!(wait_until(
        || attempts.load(Ordering::SeqCst) == 3,
        Duration::from_secs(3)
    ));
    assert!(wait_until(|| topic.depth() == 0, Duration::from_secs(2)));

    manager.close();
}

#[test]
fn max_attempts_exceeded_drops_after_exact_count() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Manager::new(dir.path());
    let topic = manager.get_or_create_typed_topic::<Order>(TopicOption::new("orders"));
    let mut opt = ChannelOption::new("c");
    opt.max_attempts = 2;
    let channel = topic.get_or_create_channel(opt).unwrap();

    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts2 = attempts.clone();
    channel.do_(move |_m: &Message, _v: Order| -> Result<(), HandlerError> {
        attempts2.fetch_add(1, Ordering::SeqCst);
        Err(Box::new(RetryError::new("always retry", Duration::from_millis(20))) as HandlerError)
    });

    topic.put(&Order { name: "a".to_string() });

    assert!(wait_until(|| topic.depth() == 0, Duration::from_secs(3)));
    // give any stray extra delivery a moment to show up, then check it didn't
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);

    manager.close();
}

#[test]
fn expired_record_is_dropped_without_delivery() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Manager::new(dir.path());
    let mut opt = ChannelOption::new("c");
    opt.expire = Some(Duration::from_secs(1));
    let topic = manager.get_or_create_typed_topic::<Order>(TopicOption::new("orders"));
    let channel = topic.get_or_create_channel(opt).unwrap();

    topic.put(&Order { name: "a".to_string() });
    // let the per-channel expiry elapse before a handler is ever attached
    std::thread::sleep(Duration::from_secs(2));

    let invoked = Arc::new(AtomicUsize::new(0));
    let invoked2 = invoked.clone();
    channel.do_(move |_m: &Message, _v: Order| -> Result<(), HandlerError> {
        invoked2.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    assert!(wait_until(|| topic.depth() == 0, Duration::from_secs(2)));
    assert_eq!(invoked.load(Ordering::SeqCst), 0);

    manager.close();
}

#[test]
fn durability_across_restart_replays_unconsumed_suffix_in_order() {
    let dir = tempfile::tempdir().unwrap();

    {
        let manager = Manager::new(dir.path());
        let mut limits = depot::QueueLimits::default();
        limits.max_file_size = 4096; // force several rotations at this record count/size
        let mut opt = ChannelOption::new("c");
        opt.limits = limits;
        let topic = manager.get_or_create_typed_topic::<Order>(TopicOption::new("orders"));
        let _channel = topic.get_or_create_channel(opt).unwrap();

        for i in 0..2_000 {
            topic.put(&Order {
                name: format!("order-{i:05}"),
            });
        }
        assert!(wait_until(|| topic.depth() == 2_000, Duration::from_secs(5)));
        manager.close();
    }

    let manager = Manager::new(dir.path());
    let topic = manager.get_or_create_typed_topic::<Order>(TopicOption::new("orders"));
    let mut limits = depot::QueueLimits::default();
    limits.max_file_size = 4096;
    let mut opt = ChannelOption::new("c");
    opt.limits = limits;
    let channel = topic.get_or_create_channel(opt).unwrap();

    let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let received2 = received.clone();
    channel.do_(move |_m: &Message, v: Order| -> Result<(), HandlerError> {
        received2.lock().unwrap().push(v.name);
        Ok(())
    });

    assert!(wait_until(
        || received.lock().unwrap().len() == 2_000,
        Duration::from_secs(10)
    ));

    let received = received.lock().unwrap();
    let expected: Vec<String> = (0..2_000).map(|i| format!("order-{i:05}")).collect();
    assert_eq!(*received, expected);

    manager.close();
}

#[test]
fn fan_out_delivers_independently_to_every_channel() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Manager::new(dir.path());
    let topic = manager.get_or_create_typed_topic::<Order>(TopicOption::new("orders"));
    let channel_a = topic.get_or_create_channel(ChannelOption::new("a")).unwrap();
    let channel_b = topic.get_or_create_channel(ChannelOption::new("b")).unwrap();

    let seen_a = Arc::new(AtomicUsize::new(0));
    let seen_a2 = seen_a.clone();
    channel_a.do_(move |_m: &Message, _v: Order| -> Result<(), HandlerError> {
        seen_a2.fetch_add(1, Ordering::SeqCst);
        Err(Box::new(TerminalError("a always fails".to_string())) as HandlerError)
    });

    let seen_b = Arc::new(AtomicUsize::new(0));
    let seen_b2 = seen_b.clone();
    channel_b.do_(move |_m: &Message, _v: Order| -> Result<(), HandlerError> {
        seen_b2.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    topic.put(&Order { name: "x".to_string() });

    assert!(wait_until(
        || seen_a.load(Ordering::SeqCst) == 1 && seen_b.load(Ordering::SeqCst) == 1,
        Duration::from_secs(2)
    ));
    assert!(wait_until(|| channel_b.depth() == 0, Duration::from_secs(2)));
    // A's terminal drop doesn't block B finishing independently.
    assert_eq!(seen_a.load(Ordering::SeqCst), 1);
    assert_eq!(seen_b.load(Ordering::SeqCst), 1);

    manager.close();
}
