//! Fixtures shared by the ChatFlow benchmarks.

use chatflow_core::{Hub, HubConfig};
use chatflow_protocol::{ConnectionId, ServerEvent};
use std::sync::Arc;
use tokio::sync::mpsc;

pub type Outbound = mpsc::Receiver<Arc<ServerEvent>>;

/// Connection id of the `i`-th benchmark user.
#[must_use]
pub fn conn(i: usize) -> ConnectionId {
    ConnectionId::new(format!("conn-{i}"))
}

/// A hub with `users` identified connections, named `user-0..`.
///
/// Queues are sized so a benchmark can drain them between iterations.
#[must_use]
pub fn populated_hub(users: usize) -> (Hub, Vec<Outbound>) {
    let hub = Hub::with_config(HubConfig {
        outbound_queue_capacity: 1024,
        ..HubConfig::default()
    });

    let mut receivers = Vec::with_capacity(users);
    for i in 0..users {
        let id = conn(i);
        if let Ok(rx) = hub.connect(&id) {
            let _ = hub.identify(&id, &format!("user-{i}"));
            receivers.push(rx);
        }
    }
    for rx in &mut receivers {
        drain(rx);
    }

    (hub, receivers)
}

/// Discard everything queued. Returns how many events there were.
pub fn drain(rx: &mut Outbound) -> usize {
    let mut count = 0;
    while rx.try_recv().is_ok() {
        count += 1;
    }
    count
}
