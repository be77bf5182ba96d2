/// Update gate: decides whether a refresh cycle should run at all.
///
/// ```text
/// Idle → CheckLocalFreshness → CheckUpstreamCoverage → Authorized
///              │                        │
///              └──────────→ Skipped ←───┘
/// ```
///
/// A refresh is skipped when the local state already says "refreshed
/// today", when the upstream coverage date cannot be read, or when the
/// upstream horizon is too short to be worth the fetch. "Today" is always
/// the UTC calendar date.

use crate::ingest::CoverageSource;
use chrono::NaiveDate;
use tracing::{info, warn};

/// Minimum days of forward coverage for a refresh to be worthwhile.
pub const DEFAULT_MIN_DAYS_REMAINING: i64 = 4;

/// Why the gate stopped without authorizing.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    AlreadyRefreshed(NaiveDate),
    CoverageUnavailable(String),
    InsufficientCoverage { coverage_end: NaiveDate, days_remaining: i64 },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::AlreadyRefreshed(date) => write!(f, "already refreshed on {}", date),
            SkipReason::CoverageUnavailable(reason) => write!(f, "upstream coverage unavailable ({})", reason),
            SkipReason::InsufficientCoverage { coverage_end, days_remaining } => write!(
                f,
                "upstream covers only {} day(s), through {}",
                days_remaining, coverage_end
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateState {
    Idle,
    CheckLocalFreshness,
    CheckUpstreamCoverage,
    Authorized { coverage_end: NaiveDate, days_remaining: i64 },
    Skipped(SkipReason),
}

impl GateState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GateState::Authorized { .. } | GateState::Skipped(_))
    }

    pub fn is_authorized(&self) -> bool {
        matches!(self, GateState::Authorized { .. })
    }
}

/// Everything the gate looks at for one run.
pub struct GateInput<'a> {
    pub today: NaiveDate,
    pub last_refresh: Option<NaiveDate>,
    pub coverage: &'a dyn CoverageSource,
    /// Skip the local freshness check (coverage is still consulted).
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateGate {
    min_days_remaining: i64,
}

impl Default for UpdateGate {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_DAYS_REMAINING)
    }
}

impl UpdateGate {
    pub fn new(min_days_remaining: i64) -> Self {
        Self { min_days_remaining }
    }

    /// Advances one transition. Terminal states are returned unchanged.
    pub fn step(&self, state: GateState, input: &GateInput<'_>) -> GateState {
        match state {
            GateState::Idle => GateState::CheckLocalFreshness,

            GateState::CheckLocalFreshness => match input.last_refresh {
                Some(last) if last == input.today && !input.force => {
                    GateState::Skipped(SkipReason::AlreadyRefreshed(last))
                }
                _ => GateState::CheckUpstreamCoverage,
            },

            GateState::CheckUpstreamCoverage => match input.coverage.coverage_end() {
                Err(e) => GateState::Skipped(SkipReason::CoverageUnavailable(e.to_string())),
                Ok(coverage_end) => {
                    let days_remaining = (coverage_end - input.today).num_days();
                    if days_remaining >= self.min_days_remaining {
                        GateState::Authorized { coverage_end, days_remaining }
                    } else {
                        GateState::Skipped(SkipReason::InsufficientCoverage {
                            coverage_end,
                            days_remaining,
                        })
                    }
                }
            },

            terminal => terminal,
        }
    }

    /// Runs the machine from `Idle` to a terminal state.
    pub fn evaluate(&self, input: &GateInput<'_>) -> GateState {
        let mut state = GateState::Idle;
        while !state.is_terminal() {
            state = self.step(state, input);
        }

        match &state {
            GateState::Authorized { coverage_end, days_remaining } => info!(
                source = input.coverage.name(),
                %coverage_end,
                days_remaining,
                "refresh authorized"
            ),
            GateState::Skipped(SkipReason::CoverageUnavailable(reason)) => warn!(
                source = input.coverage.name(),
                %reason,
                "coverage unavailable, skipping refresh"
            ),
            GateState::Skipped(reason) => info!(?reason, "refresh skipped"),
            _ => {}
        }

        state
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
