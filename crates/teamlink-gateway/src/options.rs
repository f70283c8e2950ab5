use std::time::Duration;

use crate::destination::DestinationResolver;

/// Connection tuning. Zero durations disable the matching feature.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// How often we promise to send something.
    pub heartbeat_outgoing: Duration,
    /// How often we want to hear from the broker.
    pub heartbeat_incoming: Duration,
    /// Delay before reconnecting after a lost or failed connection.
    pub reconnect_delay: Duration,
    /// Upper bound on opening the link and receiving CONNECTED.
    pub connect_timeout: Duration,
    /// Value of the STOMP `host` header.
    pub host: String,
    pub destinations: DestinationResolver,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            heartbeat_outgoing: Duration::from_secs(10),
            heartbeat_incoming: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            host: "/".into(),
            destinations: DestinationResolver::default(),
        }
    }
}

/// Heartbeat periods agreed with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Heartbeats {
    pub outgoing: Option<Duration>,
    pub incoming: Option<Duration>,
}

impl ConnectOptions {
    pub fn auto_reconnect(&self) -> bool {
        !self.reconnect_delay.is_zero()
    }

    /// `(out, in)` in milliseconds for the CONNECT `heart-beat` header.
    pub fn heart_beat_header(&self) -> (u64, u64) {
        (
            self.heartbeat_outgoing.as_millis() as u64,
            self.heartbeat_incoming.as_millis() as u64,
        )
    }

    /// Negotiate against the broker's CONNECTED `heart-beat` header
    /// (`sx,sy`). A missing or unreadable header means the broker does not
    /// heartbeat.
    pub fn negotiate(&self, server: Option<&str>) -> Heartbeats {
        let (sx, sy) = server
            .and_then(|v| {
                let (a, b) = v.split_once(',')?;
                Some((a.trim().parse::<u64>().ok()?, b.trim().parse::<u64>().ok()?))
            })
            .unwrap_or((0, 0));
        let (cx, cy) = self.heart_beat_header();
        Heartbeats {
            outgoing: agree(cx, sy),
            incoming: agree(cy, sx),
        }
    }
}

fn agree(ours: u64, theirs: u64) -> Option<Duration> {
    if ours == 0 || theirs == 0 {
        None
    } else {
        Some(Duration::from_millis(ours.max(theirs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn takes_the_larger_period() {
        let opts = ConnectOptions::default();
        let hb = opts.negotiate(Some("4000,20000"));
        assert_eq!(hb.outgoing, Some(Duration::from_secs(20)));
        assert_eq!(hb.incoming, Some(Duration::from_secs(10)));
    }

    #[test]
    fn zero_on_either_side_disables() {
        let opts = ConnectOptions {
            heartbeat_outgoing: Duration::ZERO,
            ..Default::default()
        };
        let hb = opts.negotiate(Some("5000,5000"));
        assert_eq!(hb.outgoing, None);
        assert_eq!(hb.incoming, Some(Duration::from_secs(10)));

        let hb = ConnectOptions::default().negotiate(Some("0,0"));
        assert_eq!(hb, Heartbeats::default());
    }

    #[test]
    fn missing_or_garbled_header_disables() {
        let opts = ConnectOptions::default();
        assert_eq!(opts.negotiate(None), Heartbeats::default());
        assert_eq!(opts.negotiate(Some("soon")), Heartbeats::default());
    }

    #[test]
    fn zero_delay_disables_reconnect() {
        let opts = ConnectOptions {
            reconnect_delay: Duration::ZERO,
            ..Default::default()
        };
        assert!(!opts.auto_reconnect());
        assert!(ConnectOptions::default().auto_reconnect());
    }
}
