use std::{net::IpAddr, time::Duration};

use qos_common::command::Runner;

use crate::{Error, Result};

/// Extra time granted to the `ping` process on top of its own reply deadline.
const PROCESS_GRACE: Duration = Duration::from_millis(500);

/// A synchronous, bounded-timeout round trip to a fixed destination.
#[async_trait::async_trait]
pub trait Pinger: Send + Sync {
    /// The destination being probed.
    fn destination(&self) -> IpAddr;

    /// Sends one echo request and returns the round-trip time.
    async fn ping(&self) -> Result<Duration>;
}

#[async_trait::async_trait]
impl<T: Pinger + ?Sized> Pinger for std::sync::Arc<T> {
    fn destination(&self) -> IpAddr {
        (**self).destination()
    }

    async fn ping(&self) -> Result<Duration> {
        (**self).ping().await
    }
}

/// Pings through the system `ping` binary, optionally inside a network namespace.
#[derive(Debug, Clone)]
pub struct PingCommand {
    destination: IpAddr,
    timeout: Duration,
    runner: Runner,
}

impl PingCommand {
    pub fn new(destination: IpAddr, timeout: Duration) -> Self {
        Self { destination, timeout, runner: Runner::new().with_timeout(timeout + PROCESS_GRACE) }
    }

    /// Run `ping` inside the given network namespace, e.g. from the monitored source host.
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.runner = self.runner.in_namespace(namespace);
        self
    }

    fn args(&self) -> Vec<String> {
        // iputils `-W` takes whole seconds.
        let wait = self.timeout.as_secs_f64().ceil().max(1.0) as u64;
        vec![
            "-c".to_string(),
            "1".to_string(),
            "-W".to_string(),
            wait.to_string(),
            self.destination.to_string(),
        ]
    }
}

#[async_trait::async_trait]
impl Pinger for PingCommand {
    fn destination(&self) -> IpAddr {
        self.destination
    }

    async fn ping(&self) -> Result<Duration> {
        let output = self.runner.run("ping", &self.args()).await?;
        parse_rtt(&output.stdout).ok_or(Error::NoReply)
    }
}

/// Extracts the round-trip time from `ping` output (`... time=0.123 ms`).
pub fn parse_rtt(output: &str) -> Option<Duration> {
    let (_, rest) = output.split_once("time=")?;
    let value: String = rest.chars().take_while(|c| c.is_ascii_digit() || *c == '.').collect();
    let millis: f64 = value.parse().ok()?;

    if !millis.is_finite() || millis < 0.0 {
        return None;
    }

    Some(Duration::from_secs_f64(millis / 1_000.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY: &str = "PING 172.19.40.100 (172.19.40.100) 56(84) bytes of data.
64 bytes from 172.19.40.100: icmp_seq=1 ttl=61 time=7.42 ms

--- 172.19.40.100 ping statistics ---
1 packets transmitted, 1 received, 0% packet loss, time 0ms
rtt min/avg/max/mdev = 7.420/7.420/7.420/0.000 ms";

    const LOSS: &str = "PING 172.19.40.100 (172.19.40.100) 56(84) bytes of data.

--- 172.19.40.100 ping statistics ---
1 packets transmitted, 0 received, 100% packet loss, time 0ms";

    #[test]
    fn parses_reply_time() {
        let rtt = parse_rtt(REPLY).unwrap();
        assert!((rtt.as_secs_f64() * 1_000.0 - 7.42).abs() < 1e-9);
    }

    #[test]
    fn integer_times() {
        assert_eq!(parse_rtt("icmp_seq=1 ttl=64 time=12 ms"), Some(Duration::from_millis(12)));
    }

    #[test]
    fn no_reply() {
        assert_eq!(parse_rtt(LOSS), None);
        assert_eq!(parse_rtt("time= ms"), None);
    }

    #[test]
    fn wait_is_whole_seconds() {
        let ping = PingCommand::new("10.0.0.1".parse().unwrap(), Duration::from_millis(300));
        assert_eq!(ping.args(), ["-c", "1", "-W", "1", "10.0.0.1"]);

        let ping = PingCommand::new("10.0.0.1".parse().unwrap(), Duration::from_millis(2_500));
        assert_eq!(ping.args()[3], "3");
    }
}
