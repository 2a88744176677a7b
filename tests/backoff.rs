use dmxp_transport::Transport::{Backoff, KeepaliveStatus, LinkAction, LinkMonitor};
use std::time::{Duration, Instant};

#[test]
fn test_backoff_doubles_to_cap() {
    let ms = Duration::from_millis;
    let mut backoff = Backoff::new(ms(100), ms(500));

    let delays: Vec<_> = (0..6).map(|_| backoff.next_delay()).collect();
    assert_eq!(delays, vec![ms(100), ms(200), ms(400), ms(500), ms(500), ms(500)]);

    backoff.reset();
    assert_eq!(backoff.peek(), ms(100));
    assert_eq!(backoff.next_delay(), ms(100));
    assert_eq!(backoff.peek(), ms(200));
}

#[test]
fn test_backoff_max_below_min() {
    let mut backoff = Backoff::new(Duration::from_secs(2), Duration::from_secs(1));
    assert_eq!(backoff.next_delay(), Duration::from_secs(2));
    assert_eq!(backoff.next_delay(), Duration::from_secs(2));
}

#[test]
fn test_keepalive_acknowledged() {
    let interval = Duration::from_secs(1);
    let mut monitor = LinkMonitor::new(interval);
    let t0 = Instant::now();
    assert_eq!(monitor.status(), KeepaliveStatus::Unknown);

    // Recently written links need nothing
    assert_eq!(monitor.on_tick(t0 + Duration::from_millis(500), t0), LinkAction::None);
    assert_eq!(monitor.status(), KeepaliveStatus::Unknown);

    assert_eq!(monitor.on_tick(t0 + interval, t0), LinkAction::SendRequest);
    assert_eq!(monitor.status(), KeepaliveStatus::Sent);

    monitor.on_reply();
    assert_eq!(monitor.status(), KeepaliveStatus::Acked);

    // Next idle period asks again
    let t1 = t0 + interval;
    assert_eq!(monitor.on_tick(t1 + interval, t1), LinkAction::SendRequest);
}

#[test]
fn test_keepalive_unanswered() {
    let interval = Duration::from_millis(200);
    let mut monitor = LinkMonitor::new(interval);
    let t0 = Instant::now();

    assert_eq!(monitor.on_tick(t0 + interval, t0), LinkAction::SendRequest);
    // The request itself was the last write
    let t1 = t0 + interval;
    assert_eq!(monitor.on_tick(t1 + interval / 2, t1), LinkAction::None);
    assert_eq!(monitor.on_tick(t1 + interval, t1), LinkAction::Dead);

    monitor.reset();
    assert_eq!(monitor.status(), KeepaliveStatus::Unknown);
}
