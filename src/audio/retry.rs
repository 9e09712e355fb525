//! Retry and rotation decisions
//!
//! `RetryMachine` decides what the player does next; it never touches the
//! network itself. The player asks for the next `Action`, performs it, and
//! reports the outcome back.
//!
//! ```text
//! Resolving --urls--> Connecting --mid-stream drop--> Rotating
//!     |                   |                              |
//!     +----------- exhausted -------> Exhausted <--------+
//! ```
//!
//! While `Connecting`, each resolved URL gets one first try plus up to
//! `max_attempts` retries; non-retryable statuses skip the URL at once.
//! `Rotating` cycles over the same URLs, one try per URL per cycle, and
//! starts over at cycle 1 whenever an attempt plays and then drops again.

use std::collections::VecDeque;

use super::status::RetryInfo;
use crate::error::PlayerError;
use crate::playlist::StreamDescriptor;

/// Per-attempt errors kept for the final summary
pub const MAX_ERRORS_TO_KEEP: usize = 10;

/// What the player should do next
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Resolve an endpoint into stream URLs
    Resolve { endpoint: String },
    /// Connect to a stream URL
    ///
    /// With `retry` set the player reports it, enters `Reconnecting` and
    /// waits the retry delay before connecting.
    Attempt {
        url: String,
        descriptor: StreamDescriptor,
        retry: Option<RetryInfo>,
    },
    /// Nothing left to try
    GiveUp { error: String },
}

#[derive(Debug, Clone)]
enum Phase {
    Resolving {
        endpoint: usize,
    },
    Connecting {
        endpoint: usize,
        descriptor: StreamDescriptor,
        urls: Vec<String>,
        url: usize,
        attempt: u32,
    },
    Rotating {
        descriptor: StreamDescriptor,
        urls: Vec<String>,
        cycle: u32,
        slot: usize,
    },
    Exhausted {
        error: String,
    },
}

#[derive(Debug)]
pub struct RetryMachine {
    endpoints: Vec<String>,
    max_attempts: u32,
    short_circuit_network_down: bool,
    phase: Phase,
    errors: VecDeque<String>,
}

impl RetryMachine {
    pub fn new(endpoints: Vec<String>, max_attempts: u32, short_circuit_network_down: bool) -> Self {
        let phase = if endpoints.is_empty() {
            Phase::Exhausted {
                error: "no playlists available".to_string(),
            }
        } else {
            Phase::Resolving { endpoint: 0 }
        };

        Self {
            endpoints,
            max_attempts,
            short_circuit_network_down,
            phase,
            errors: VecDeque::new(),
        }
    }

    pub fn is_rotating(&self) -> bool {
        matches!(self.phase, Phase::Rotating { .. })
    }

    pub fn errors(&self) -> impl Iterator<Item = &str> {
        self.errors.iter().map(String::as_str)
    }

    pub fn next_action(&self) -> Action {
        match &self.phase {
            Phase::Resolving { endpoint } => Action::Resolve {
                endpoint: self.endpoints[*endpoint].clone(),
            },
            Phase::Connecting {
                descriptor,
                urls,
                url,
                attempt,
                ..
            } => Action::Attempt {
                url: urls[*url].clone(),
                descriptor: descriptor.clone(),
                retry: (*attempt > 0).then_some(RetryInfo {
                    attempt: *attempt,
                    max_attempts: self.max_attempts,
                }),
            },
            Phase::Rotating {
                descriptor,
                urls,
                cycle,
                slot,
            } => Action::Attempt {
                url: urls[*slot].clone(),
                descriptor: descriptor.clone(),
                retry: Some(RetryInfo {
                    attempt: *cycle,
                    max_attempts: self.max_attempts,
                }),
            },
            Phase::Exhausted { error } => Action::GiveUp {
                error: error.clone(),
            },
        }
    }

    /// Outcome of a `Resolve` action
    pub fn on_resolved(&mut self, result: Result<Vec<String>, PlayerError>) {
        let Phase::Resolving { endpoint } = self.phase else {
            return;
        };
        let endpoint_url = self.endpoints[endpoint].clone();

        match result {
            Ok(urls) if !urls.is_empty() => {
                self.phase = Phase::Connecting {
                    endpoint,
                    descriptor: StreamDescriptor::from_playlist_url(&endpoint_url),
                    urls,
                    url: 0,
                    attempt: 0,
                };
            }
            Ok(_) => {
                self.record(format!("{endpoint_url}: playlist has no stream URLs"));
                self.next_endpoint(endpoint);
            }
            Err(error) => {
                self.record(format!("{endpoint_url}: {error}"));
                if self.should_short_circuit(&error) {
                    self.exhaust();
                } else {
                    self.next_endpoint(endpoint);
                }
            }
        }
    }

    /// Outcome of an `Attempt` action that did not end in a deliberate stop
    pub fn on_attempt_failed(&mut self, error: &PlayerError) {
        let phase = std::mem::replace(
            &mut self.phase,
            Phase::Exhausted {
                error: String::new(),
            },
        );

        match phase {
            Phase::Connecting {
                endpoint,
                descriptor,
                urls,
                url,
                attempt,
            } => {
                let url_text = &urls[url];
                if matches!(error, PlayerError::MidStreamDrop(_)) {
                    tracing::info!("Stream dropped after playing, rotating across mirrors");
                    self.record(format!("{url_text}: {error}"));
                    self.phase = Phase::Rotating {
                        descriptor,
                        urls,
                        cycle: 1,
                        slot: 0,
                    };
                    return;
                }

                if error.is_non_retryable() {
                    self.record(format!("{url_text}: {error}"));
                    self.next_url(endpoint, descriptor, urls, url);
                    return;
                }

                self.record(format!("{url_text} (attempt {}): {error}", attempt + 1));
                if self.should_short_circuit(error) {
                    self.exhaust();
                } else if attempt < self.max_attempts {
                    self.phase = Phase::Connecting {
                        endpoint,
                        descriptor,
                        urls,
                        url,
                        attempt: attempt + 1,
                    };
                } else {
                    self.next_url(endpoint, descriptor, urls, url);
                }
            }
            Phase::Rotating {
                descriptor,
                urls,
                cycle,
                slot,
            } => {
                if matches!(error, PlayerError::MidStreamDrop(_)) {
                    // It played for a while, so it is healthy: start over
                    self.phase = Phase::Rotating {
                        descriptor,
                        urls,
                        cycle: 1,
                        slot: 0,
                    };
                    return;
                }

                let failed = format!("reconnection failed: {error}");
                if self.should_short_circuit(error) {
                    self.phase = Phase::Exhausted { error: failed };
                    return;
                }

                let (cycle, slot) = if slot + 1 < urls.len() {
                    (cycle, slot + 1)
                } else {
                    (cycle + 1, 0)
                };

                self.phase = if cycle > self.max_attempts {
                    Phase::Exhausted { error: failed }
                } else {
                    Phase::Rotating {
                        descriptor,
                        urls,
                        cycle,
                        slot,
                    }
                };
            }
            other => self.phase = other,
        }
    }

    fn should_short_circuit(&self, error: &PlayerError) -> bool {
        self.short_circuit_network_down && error.is_network_down()
    }

    fn next_url(
        &mut self,
        endpoint: usize,
        descriptor: StreamDescriptor,
        urls: Vec<String>,
        url: usize,
    ) {
        if url + 1 < urls.len() {
            self.phase = Phase::Connecting {
                endpoint,
                descriptor,
                urls,
                url: url + 1,
                attempt: 0,
            };
        } else {
            self.next_endpoint(endpoint);
        }
    }

    fn next_endpoint(&mut self, endpoint: usize) {
        if endpoint + 1 < self.endpoints.len() {
            self.phase = Phase::Resolving {
                endpoint: endpoint + 1,
            };
        } else {
            self.exhaust();
        }
    }

    fn exhaust(&mut self) {
        let summary = self.errors.iter().cloned().collect::<Vec<_>>().join("; ");
        self.phase = Phase::Exhausted {
            error: format!("all streams failed: {summary}"),
        };
    }

    /// Keep the newest entries once the log is full
    ///
    /// A long session records its early resolution failures long before it
    /// gives up, and the summary has to name the failures that exhausted it.
    fn record(&mut self, error: String) {
        tracing::warn!("{}", error);
        if self.errors.len() == MAX_ERRORS_TO_KEEP {
            self.errors.pop_front();
        }
        self.errors.push_back(error);
    }
}
