use std::{collections::VecDeque, net::IpAddr, sync::Arc, time::Duration};

use parking_lot::Mutex;
use qos::{
    common::Rate,
    control::{Interface, NetworkNode, NodeRegistry},
    probe::{Error, Pinger, Result},
};

/// Replays queued latencies, then keeps answering with the last one. `None` is a timeout.
#[derive(Default)]
pub struct ScriptedPinger {
    queue: Mutex<VecDeque<Option<f64>>>,
    last: Mutex<Option<f64>>,
}

impl ScriptedPinger {
    pub fn new(samples: impl IntoIterator<Item = Option<f64>>) -> Arc<Self> {
        let pinger = Arc::new(Self::default());
        pinger.push(samples);
        pinger
    }

    pub fn push(&self, samples: impl IntoIterator<Item = Option<f64>>) {
        self.queue.lock().extend(samples);
    }
}

#[async_trait::async_trait]
impl Pinger for ScriptedPinger {
    fn destination(&self) -> IpAddr {
        IpAddr::from([172, 19, 40, 100])
    }

    async fn ping(&self) -> Result<Duration> {
        let next = match self.queue.lock().pop_front() {
            Some(next) => {
                *self.last.lock() = next;
                next
            }
            None => *self.last.lock(),
        };

        next.map(|ms| Duration::from_secs_f64(ms / 1_000.0)).ok_or(Error::NoReply)
    }
}

/// The transit routers of the reference topology.
pub fn transit_routers() -> NodeRegistry {
    let router = |name: &str, backward: &[&str], forward: &[&str]| {
        let node = NetworkNode::new(name).in_namespace(name);
        let node = backward
            .iter()
            .fold(node, |n, dev| n.with_interface(Interface::backward(format!("{name}-{dev}"))));
        forward.iter().fold(node, |n, dev| {
            n.with_interface(Interface::forward(format!("{name}-{dev}")).with_capacity(Rate::mbit(100)))
        })
    };

    NodeRegistry::new(vec![
        router("r_trans1", &["eth0"], &["eth1"]),
        router("r_trans2", &["eth0"], &["eth1"]),
        router("r_trans3", &["eth0", "eth1"], &["eth2"]),
        router("r_trans4", &["eth0"], &["eth1"]),
    ])
    .unwrap()
}
