//! # Backpressure Integration Tests
//!
//! Flood scenarios against the default route table.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use loadmatch_ingress::{Admission, Backpressure, CallerIdentity};
use loadmatch_types::{BackpressureConfig, LoadmatchError, Route, constants};
use rand::Rng;

fn ip(n: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(203, 0, 113, n))
}

#[test]
fn offer_flood_is_slowed_then_capped() {
    let bp = Backpressure::new(&BackpressureConfig::default());
    let caller = CallerIdentity::from_ip(ip(1));

    let mut delays = Vec::new();
    let mut t = 0;
    loop {
        match bp.admit(Route::SubmitOffer, &caller, t) {
            Ok(admission) => delays.push(admission.delay()),
            Err(LoadmatchError::TooManyRequests { retry_after_ms, .. }) => {
                assert!(retry_after_ms > 0);
                break;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
        t += 10;
    }

    assert_eq!(delays.len(), constants::DEFAULT_WRITE_MAX_REQUESTS);
    let free = constants::DEFAULT_SLOW_DOWN_DELAY_AFTER;
    assert!(delays[..free].iter().all(Duration::is_zero));
    assert_eq!(
        delays[free],
        Duration::from_millis(constants::DEFAULT_SLOW_DOWN_STEP_MS)
    );
    assert_eq!(
        *delays.last().unwrap(),
        Duration::from_millis(constants::DEFAULT_SLOW_DOWN_MAX_DELAY_MS)
    );
}

#[test]
fn accept_route_has_no_slow_down() {
    let bp = Backpressure::default();
    let caller = CallerIdentity::from_ip(ip(2));
    for t in 0..50 {
        assert_eq!(bp.admit(Route::AcceptOffer, &caller, t).unwrap(), Admission::Proceed);
    }
}

#[test]
fn randomized_traffic_never_exceeds_cap_in_any_window() {
    let mut rng = rand::thread_rng();
    let bp = Backpressure::default();
    let window = constants::DEFAULT_WRITE_WINDOW_MS;
    let cap = constants::DEFAULT_WRITE_MAX_REQUESTS;

    let mut admitted: Vec<Vec<u64>> = vec![Vec::new(); 4];
    let mut now = 0u64;
    for _ in 0..2_000 {
        now += rng.gen_range(0..20_000);
        let who = rng.gen_range(0..4u8);
        let caller = CallerIdentity::from_ip(ip(who));
        if bp.admit(Route::Deposit, &caller, now).is_ok() {
            admitted[usize::from(who)].push(now);
        }
    }

    for times in &admitted {
        for (i, &start) in times.iter().enumerate() {
            let in_window = times[i..]
                .iter()
                .take_while(|&&t| t < start + window)
                .count();
            assert!(in_window <= cap, "{in_window} admitted within one window");
        }
    }
}
