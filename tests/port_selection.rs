//! Port selection behavior of the share listener.

use cursor_kit::share::bind_with_retries;
use std::net::TcpListener;

// High base ports so the tests do not collide with local services.

#[test]
fn occupied_ports_fall_through_to_next_free_one() {
    let base = 42510u16;
    // Occupy base..base+5; the sixth port stays free.
    let _held: Vec<TcpListener> = (0..5)
        .map(|i| TcpListener::bind(("127.0.0.1", base + i)).expect("occupy port"))
        .collect();

    let listener = bind_with_retries(base, true).expect("bind should retry");
    assert_eq!(listener.local_addr().unwrap().port(), base + 5);
}

#[test]
fn free_requested_port_is_used_directly() {
    let base = 42610u16;
    let listener = bind_with_retries(base, true).expect("bind");
    assert_eq!(listener.local_addr().unwrap().port(), base);
}

#[test]
fn exhausting_the_retry_budget_is_a_descriptive_error() {
    let base = 42710u16;
    let _held: Vec<TcpListener> = (0..10)
        .map(|i| TcpListener::bind(("127.0.0.1", base + i)).expect("occupy port"))
        .collect();

    let err = bind_with_retries(base, true).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("available port"), "unexpected message: {msg}");
    assert!(msg.contains("10"), "should mention the attempt budget: {msg}");
}
