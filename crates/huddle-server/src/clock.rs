//! Clock broadcaster: pushes the local time to a connection on a fixed tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::session::{CloseReason, Transport, close_within_grace};

/// Format one clock line, e.g. `"The time is: 03:04:05 PM"`.
pub fn clock_line<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("The time is: {}", now.format("%I:%M:%S %p"))
}

/// Send the time every `interval` until the peer leaves or shutdown.
pub async fn run_clock<T: Transport>(
    mut transport: T,
    interval: Duration,
    shutdown: CancellationToken,
) -> CloseReason {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let reason = loop {
        tokio::select! {
            () = shutdown.cancelled() => break CloseReason::Shutdown,
            inbound = transport.receive() => {
                // Anything the peer sends is ignored; only its departure matters.
                if let Err(e) = inbound {
                    break if e.is_disconnect() { CloseReason::PeerClosed } else { CloseReason::TransportError };
                }
            }
            _ = ticker.tick() => {
                let line = clock_line(&Local::now());
                tokio::select! {
                    () = shutdown.cancelled() => break CloseReason::Shutdown,
                    sent = transport.send(Arc::from(line)) => {
                        if sent.is_err() {
                            break CloseReason::TransportError;
                        }
                    }
                }
            }
        }
    };

    debug!(%reason, "clock stream ended");
    close_within_grace(&mut transport, reason).await;
    reason
}
