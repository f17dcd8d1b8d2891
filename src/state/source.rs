use crate::config::{SelectorHints, SourceEntry, MAX_INTERVAL_MINUTES};
use crate::state::RunStatus;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::fmt;

/// Structural shape of a notice page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageShape {
    /// Rows of a repeating `<table>`
    Table,

    /// Repeating list items or cards
    List,

    /// No usable structure; handled by the language model
    #[serde(alias = "generic")]
    Unstructured,
}

impl PageShape {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::List => "list",
            Self::Unstructured => "unstructured",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "table" => Some(Self::Table),
            "list" => Some(Self::List),
            "unstructured" | "generic" => Some(Self::Unstructured),
            _ => None,
        }
    }

    /// Returns true for the shapes handled by deterministic parsers
    pub fn is_structured(&self) -> bool {
        !matches!(self, Self::Unstructured)
    }
}

impl fmt::Display for PageShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Exponential backoff applied to the next eligible attempt time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_multiplier: u32,
}

impl BackoffPolicy {
    pub fn new(max_multiplier: u32) -> Self {
        Self {
            max_multiplier: max_multiplier.max(1),
        }
    }

    /// Multiplier for the given number of consecutive failures
    ///
    /// Doubles per failure and saturates at `max_multiplier`; zero failures
    /// gives the base interval.
    pub fn multiplier(&self, consecutive_failures: u32) -> u32 {
        let exponent = consecutive_failures.min(31);
        2u32.saturating_pow(exponent).min(self.max_multiplier)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(8)
    }
}

/// Mutable scheduling state of one source
///
/// Written only at the terminal transition of an attempt, as a whole value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceState {
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub next_eligible_at: Option<DateTime<Utc>>,

    /// Set when the declared page-shape hint failed to parse
    pub hint_invalidated: bool,
}

impl SourceState {
    /// Computes the state that follows a finished attempt
    ///
    /// # Arguments
    ///
    /// * `status` - Terminal status of the attempt
    /// * `attempted_at` - When the attempt started
    /// * `min_interval` - The source's base re-scrape interval
    /// * `backoff` - Backoff policy applied after transport failures
    /// * `hint_failed` - Whether the declared hint soft-failed during this attempt
    pub fn after_attempt(
        &self,
        status: RunStatus,
        attempted_at: DateTime<Utc>,
        min_interval: Duration,
        backoff: BackoffPolicy,
        hint_failed: bool,
    ) -> Self {
        let mut next = self.clone();
        next.last_attempt = Some(attempted_at);
        next.hint_invalidated = self.hint_invalidated || hint_failed;

        let wait = if status.counts_as_failure() {
            next.consecutive_failures = self.consecutive_failures.saturating_add(1);
            let multiplier = backoff.multiplier(next.consecutive_failures);
            min_interval.checked_mul(multiplier.min(i32::MAX as u32) as i32)
        } else {
            if status.is_success() {
                next.last_success = Some(attempted_at);
                next.consecutive_failures = 0;
            }
            Some(min_interval)
        };

        // Saturates instead of overflowing for absurd intervals
        next.next_eligible_at = Some(
            wait.and_then(|wait| attempted_at.checked_add_signed(wait))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        );

        next
    }
}

/// Converts a configured interval, clamped to the accepted maximum
fn interval_from_minutes(minutes: u64) -> Duration {
    Duration::minutes(minutes.min(MAX_INTERVAL_MINUTES) as i64)
}

/// A configured source together with its scheduling state
#[derive(Debug, Clone)]
pub struct Source {
    pub id: String,
    pub name: String,
    pub url: String,
    pub shape_hint: Option<PageShape>,
    pub min_interval: Duration,
    pub active: bool,
    pub selectors: SelectorHints,
    pub state: SourceState,
}

impl Source {
    /// Builds a never-attempted source from its configuration entry
    pub fn from_entry(entry: &SourceEntry) -> Self {
        Self {
            id: entry.id.clone(),
            name: entry.name.clone(),
            url: entry.url.clone(),
            shape_hint: entry.page_shape,
            min_interval: interval_from_minutes(entry.min_interval_minutes),
            active: entry.active,
            selectors: entry.selectors.clone(),
            state: SourceState::default(),
        }
    }

    /// Returns true if the source should be attempted at `now`
    ///
    /// A never-attempted source is always due. Otherwise the stored next
    /// eligible time wins, falling back to `last_attempt + min_interval`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.active {
            return false;
        }

        match (self.state.next_eligible_at, self.state.last_attempt) {
            (Some(eligible), _) => now >= eligible,
            (None, Some(last)) => now - last >= self.min_interval,
            (None, None) => true,
        }
    }

    /// The declared hint, unless a previous attempt invalidated it
    pub fn effective_hint(&self) -> Option<PageShape> {
        if self.state.hint_invalidated {
            None
        } else {
            self.shape_hint
        }
    }

    /// Applies a configuration change while keeping the mutable state
    ///
    /// A changed hint clears the invalidation flag.
    pub fn refresh_from(&mut self, entry: &SourceEntry) {
        if self.shape_hint != entry.page_shape {
            self.state.hint_invalidated = false;
        }
        self.name = entry.name.clone();
        self.url = entry.url.clone();
        self.shape_hint = entry.page_shape;
        self.min_interval = interval_from_minutes(entry.min_interval_minutes);
        self.active = entry.active;
        self.selectors = entry.selectors.clone();
    }
}
