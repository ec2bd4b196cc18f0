//! Synthesized Ollama timing metadata.
//!
//! The upstream reports neither load times nor per-phase eval durations in
//! Ollama's terms, so they are measured on the proxy's wall clock. Token
//! counts fall back to whitespace splitting when the upstream omits usage;
//! this is an approximation, not a tokenizer.

use std::time::{Duration, Instant};

use super::ollama_types::Metrics;
use super::upstream_types::{ChatUsage, TimeInfo};

/// Wall-clock checkpoints for one request.
#[derive(Debug, Clone, Copy)]
pub struct RequestTimer {
    started: Instant,
    connected: Option<Instant>,
    first_fragment: Option<Instant>,
    last_fragment: Option<Instant>,
}

impl RequestTimer {
    pub fn start() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(started: Instant) -> Self {
        Self {
            started,
            connected: None,
            first_fragment: None,
            last_fragment: None,
        }
    }

    /// Upstream response headers arrived.
    pub fn mark_connected(&mut self) {
        self.mark_connected_at(Instant::now());
    }

    pub fn mark_connected_at(&mut self, at: Instant) {
        self.connected.get_or_insert(at);
    }

    /// A non-empty fragment was emitted.
    pub fn mark_fragment(&mut self) {
        self.mark_fragment_at(Instant::now());
    }

    pub fn mark_fragment_at(&mut self, at: Instant) {
        self.first_fragment.get_or_insert(at);
        self.last_fragment = Some(at);
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Aggregate metrics as of `now`.
    ///
    /// `load_duration` is dispatch to headers, `prompt_eval_duration` headers to
    /// first fragment, `eval_duration` first to last fragment. Without any
    /// fragment timestamps (whole responses) the time after headers counts as eval.
    pub fn metrics_at(&self, now: Instant, counts: TokenCounts, upstream: Option<TimeInfo>) -> Metrics {
        let connected = self.connected.unwrap_or(now);
        let load = connected.saturating_duration_since(self.started);

        let (prompt_eval, eval) = match (self.first_fragment, self.last_fragment) {
            (Some(first), Some(last)) => (
                first.saturating_duration_since(connected),
                last.saturating_duration_since(first),
            ),
            _ => (Duration::ZERO, now.saturating_duration_since(connected)),
        };

        let prompt_eval = upstream
            .and_then(|t| t.prompt_time)
            .and_then(seconds)
            .unwrap_or(prompt_eval);
        let eval = upstream
            .and_then(|t| t.completion_time)
            .and_then(seconds)
            .unwrap_or(eval);

        Metrics {
            total_duration: nanos(now.saturating_duration_since(self.started)),
            load_duration: Some(nanos(load)),
            prompt_eval_count: Some(counts.prompt),
            prompt_eval_duration: Some(nanos(prompt_eval)),
            eval_count: Some(counts.eval),
            eval_duration: Some(nanos(eval)),
        }
    }

    pub fn metrics(&self, counts: TokenCounts, upstream: Option<TimeInfo>) -> Metrics {
        self.metrics_at(Instant::now(), counts, upstream)
    }

    /// Only `total_duration`, for error terminals.
    pub fn total_only(&self) -> Metrics {
        Metrics {
            total_duration: nanos(self.elapsed()),
            ..Metrics::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenCounts {
    pub prompt: u64,
    pub eval: u64,
}

impl TokenCounts {
    /// Upstream usage wins; otherwise approximate from text.
    pub fn resolve(usage: Option<ChatUsage>, prompt_text_tokens: u64, generated: &str) -> Self {
        match usage {
            Some(u) => Self {
                prompt: u.prompt_tokens,
                eval: u.completion_tokens,
            },
            None => Self {
                prompt: prompt_text_tokens,
                eval: approximate_tokens(generated),
            },
        }
    }
}

pub fn approximate_tokens(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

fn nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

fn seconds(s: f64) -> Option<Duration> {
    (s.is_finite() && s >= 0.0).then(|| Duration::from_secs_f64(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_durations() {
        let t0 = Instant::now();
        let mut timer = RequestTimer::starting_at(t0);
        timer.mark_connected_at(t0 + Duration::from_millis(10));
        timer.mark_fragment_at(t0 + Duration::from_millis(30));
        timer.mark_fragment_at(t0 + Duration::from_millis(70));

        let m = timer.metrics_at(
            t0 + Duration::from_millis(80),
            TokenCounts { prompt: 3, eval: 5 },
            None,
        );

        assert_eq!(m.total_duration, 80_000_000);
        assert_eq!(m.load_duration, Some(10_000_000));
        assert_eq!(m.prompt_eval_duration, Some(20_000_000));
        assert_eq!(m.eval_duration, Some(40_000_000));
        assert_eq!(m.prompt_eval_count, Some(3));
        assert_eq!(m.eval_count, Some(5));
    }

    #[test]
    fn test_upstream_time_info_preferred() {
        let t0 = Instant::now();
        let mut timer = RequestTimer::starting_at(t0);
        timer.mark_connected_at(t0 + Duration::from_millis(5));

        let info = TimeInfo {
            prompt_time: Some(0.002),
            completion_time: Some(0.5),
            ..TimeInfo::default()
        };
        let m = timer.metrics_at(t0 + Duration::from_millis(900), TokenCounts::default(), Some(info));

        assert_eq!(m.prompt_eval_duration, Some(2_000_000));
        assert_eq!(m.eval_duration, Some(500_000_000));
        assert_eq!(m.total_duration, 900_000_000);
    }

    #[test]
    fn test_never_connected_is_all_load() {
        let t0 = Instant::now();
        let timer = RequestTimer::starting_at(t0);
        let m = timer.metrics_at(t0 + Duration::from_millis(3), TokenCounts::default(), None);
        assert_eq!(m.load_duration, Some(3_000_000));
        assert_eq!(m.eval_duration, Some(0));
    }

    #[test]
    fn test_token_count_resolution() {
        let usage = ChatUsage {
            prompt_tokens: 11,
            completion_tokens: 7,
            total_tokens: 18,
        };
        assert_eq!(
            TokenCounts::resolve(Some(usage), 2, "ignored text"),
            TokenCounts { prompt: 11, eval: 7 }
        );
        assert_eq!(
            TokenCounts::resolve(None, 2, "  three little\twords\n"),
            TokenCounts { prompt: 2, eval: 3 }
        );
        assert_eq!(approximate_tokens(""), 0);
    }
}
