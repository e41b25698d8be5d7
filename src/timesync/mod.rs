//! Clock synchronization with a remote system.
//!
//! Each peer periodically sends a TIMESYNC probe stamped with its own clock and answers
//! the probes of the other side, so both ends track their offset to the other. Replies to
//! our own probes are turned into offset samples and fed through [filter::observe].
//!
//! Reference: <https://mavlink.io/en/services/timesync.html>
mod filter;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace, warn};

pub use filter::{observe, ClockOffsetEstimate, Outcome, Sample, TimesyncConfig};

use crate::clock::Clock;
use crate::transport::{MessageSink, Outbound, SystemTimeMessage, TimesyncMessage};

/// Diagnostic events produced while synchronizing.
#[derive(Debug, Clone, PartialEq)]
pub enum TimesyncEvent {
    ProbeSent {
        ts1: u64,
    },
    /// A peer-initiated probe was answered.
    ProbeAnswered {
        ts1: i64,
    },
    SampleAccepted {
        offset_ns: f64,
        skew_ns: f64,
        sample_count: u32,
    },
    /// Sample dropped because of its round-trip time.
    SampleRejected {
        rtt_ns: u64,
    },
    /// Round-trip time has been too high for too many samples in a row.
    HighRtt {
        rtt_ns: u64,
    },
    HighDeviation {
        deviation_ns: u64,
    },
    /// Remote time jumped and the estimate was reset.
    TimeJump {
        deviation_ns: u64,
    },
    RemoteClockValid {
        unix_usec: u64,
    },
    /// Remote reported a wall-clock time that cannot be valid; ours was sent in reply.
    InvalidRemoteClock {
        unix_usec: u64,
    },
}

/// Receives [TimesyncEvent]s. The filter itself never logs.
pub trait TimesyncObserver: Send + Sync {
    fn on_event(&self, event: &TimesyncEvent);
}

/// Default observer that logs events with `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl TimesyncObserver for TracingObserver {
    fn on_event(&self, event: &TimesyncEvent) {
        match event {
            TimesyncEvent::HighRtt { rtt_ns } => {
                warn!(rtt_ms = *rtt_ns as f64 / 1e6, "RTT too high for timesync");
            }
            TimesyncEvent::TimeJump { deviation_ns } => {
                warn!(
                    deviation_ms = *deviation_ns as f64 / 1e6,
                    "time jump detected, resetting time synchronizer"
                );
            }
            TimesyncEvent::InvalidRemoteClock { unix_usec } => {
                warn!(unix_usec, "wrong remote system time, sending ours");
            }
            TimesyncEvent::RemoteClockValid { unix_usec } => {
                debug!(unix_usec, "remote system time received");
            }
            TimesyncEvent::HighDeviation { deviation_ns } => {
                debug!(deviation_ns, "timesync sample deviates from estimate");
            }
            other => trace!(event = ?other, "timesync"),
        }
    }
}

struct State {
    estimate: ClockOffsetEstimate,
    last_probe_ns: Option<u64>,
}

/// Per-connection clock synchronization engine.
///
/// # Examples
/// ```
/// use std::sync::Arc;
/// use crossbeam::channel::unbounded;
/// use mavstream::clock::SystemClock;
/// use mavstream::timesync::{Timesync, TimesyncConfig};
/// use mavstream::transport::ChannelSink;
///
/// let (tx, rx) = unbounded();
/// let timesync = Timesync::new(
///     TimesyncConfig::default(),
///     Arc::new(SystemClock::default()),
///     Arc::new(ChannelSink::new(tx)),
/// );
/// timesync.set_link_active(true);
/// timesync.do_work();
/// assert_eq!(rx.len(), 1);
/// ```
pub struct Timesync {
    config: TimesyncConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn MessageSink>,
    observer: Box<dyn TimesyncObserver>,
    link_active: AtomicBool,
    state: Mutex<State>,
}

impl Timesync {
    pub fn new(config: TimesyncConfig, clock: Arc<dyn Clock>, sink: Arc<dyn MessageSink>) -> Self {
        let estimate = ClockOffsetEstimate::new(&config);
        Timesync {
            config,
            clock,
            sink,
            observer: Box::new(TracingObserver),
            link_active: AtomicBool::new(false),
            state: Mutex::new(State {
                estimate,
                last_probe_ns: None,
            }),
        }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Box<dyn TimesyncObserver>) -> Self {
        self.observer = observer;
        self
    }

    #[must_use]
    pub fn config(&self) -> &TimesyncConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Probes are only sent while the link is active.
    pub fn set_link_active(&self, active: bool) {
        self.link_active.store(active, Ordering::Relaxed);
    }

    /// Send an initiating probe if the link is active and the send interval has elapsed.
    pub fn do_work(&self) {
        if !self.link_active.load(Ordering::Relaxed) {
            return;
        }
        let now = self.clock.steady_ns();
        let interval = u64::try_from(self.config.send_interval.as_nanos()).unwrap_or(u64::MAX);
        {
            let mut state = self.lock();
            if let Some(last) = state.last_probe_ns {
                if now.saturating_sub(last) < interval {
                    return;
                }
            }
            state.last_probe_ns = Some(now);
        }
        self.sink.send(Outbound::Timesync(TimesyncMessage {
            tc1: 0,
            ts1: i64::try_from(now).unwrap_or(i64::MAX),
        }));
        self.observer.on_event(&TimesyncEvent::ProbeSent { ts1: now });
    }

    /// Handle a SYSTEM_TIME broadcast from the remote system.
    pub fn on_system_time(&self, msg: &SystemTimeMessage) {
        if msg.is_valid() {
            self.observer.on_event(&TimesyncEvent::RemoteClockValid {
                unix_usec: msg.time_unix_usec,
            });
            return;
        }
        self.sink.send(Outbound::SystemTime(SystemTimeMessage {
            time_unix_usec: self.clock.unix_usec(),
            time_boot_ms: self.clock.boot_ms(),
        }));
        self.observer.on_event(&TimesyncEvent::InvalidRemoteClock {
            unix_usec: msg.time_unix_usec,
        });
    }

    /// Handle a TIMESYNC message, either answering a peer probe or completing one of ours.
    pub fn on_timesync(&self, msg: &TimesyncMessage) {
        let now = self.clock.steady_ns();

        if msg.is_request() {
            self.sink.send(Outbound::Timesync(TimesyncMessage {
                tc1: i64::try_from(now).unwrap_or(i64::MAX),
                ts1: msg.ts1,
            }));
            self.observer
                .on_event(&TimesyncEvent::ProbeAnswered { ts1: msg.ts1 });
            return;
        }
        if msg.tc1 < 0 {
            debug!(tc1 = msg.tc1, "ignoring timesync with negative remote timestamp");
            return;
        }

        let sample = Sample::from_round_trip(msg.tc1, msg.ts1, now);
        let (outcome, estimate) = {
            let mut state = self.lock();
            let outcome = observe(&mut state.estimate, sample, &self.config);
            (outcome, state.estimate)
        };

        let event = match outcome {
            Outcome::Accepted => TimesyncEvent::SampleAccepted {
                offset_ns: estimate.offset_ns,
                skew_ns: estimate.skew_ns,
                sample_count: estimate.sample_count,
            },
            Outcome::HighRtt { rtt_ns, warn: true } => TimesyncEvent::HighRtt { rtt_ns },
            Outcome::HighRtt { rtt_ns, warn: false } => TimesyncEvent::SampleRejected { rtt_ns },
            Outcome::HighDeviation { deviation_ns } => {
                TimesyncEvent::HighDeviation { deviation_ns }
            }
            Outcome::Reset { deviation_ns } => TimesyncEvent::TimeJump { deviation_ns },
        };
        self.observer.on_event(&event);
    }

    /// Snapshot of the current estimate.
    #[must_use]
    pub fn current_offset(&self) -> ClockOffsetEstimate {
        self.lock().estimate
    }

    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.current_offset().is_converged(&self.config)
    }

    /// Best estimate of the remote clock right now, in nanoseconds.
    #[must_use]
    pub fn remote_time_now(&self) -> u64 {
        self.translate_local_to_remote(self.clock.steady_ns())
    }

    #[must_use]
    pub fn translate_local_to_remote(&self, local_ns: u64) -> u64 {
        self.current_offset().to_remote(local_ns)
    }

    #[must_use]
    pub fn translate_remote_to_local(&self, remote_ns: u64) -> u64 {
        self.current_offset().to_local(remote_ns)
    }

    /// Drop all accumulated statistics, e.g., after reconnecting to a rebooted system.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.estimate = ClockOffsetEstimate::new(&self.config);
    }
}
