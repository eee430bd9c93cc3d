//! Caller-ID selection
//!
//! Picks which outbound number a leg presents, given the run's configured
//! number pool and strategy. Selection is a pure function of the pool and
//! the run's attempt counter; it never mutates shared state, so the
//! coordinator can call it once per initiated leg without coordination.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Policy for choosing the presented outbound number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallerIdStrategy {
    /// Cycle through the pool in order across consecutive attempts
    RoundRobin,
    /// Uniform random pick from the pool
    Random,
    /// Always present the first number in the pool
    Single,
}

impl Default for CallerIdStrategy {
    fn default() -> Self {
        Self::RoundRobin
    }
}

/// Select the outbound number for one attempt
///
/// `attempt` is the run's running attempt counter (0-based). Returns
/// `None` only for an empty pool, which run start rules out.
///
/// # Examples
///
/// ```
/// use dialer_engine::callerid::{select_caller_id, CallerIdStrategy};
///
/// let pool = vec!["+15550001".to_string(), "+15550002".to_string()];
/// assert_eq!(
///     select_caller_id(&pool, CallerIdStrategy::RoundRobin, 3),
///     Some("+15550002")
/// );
/// assert_eq!(
///     select_caller_id(&pool, CallerIdStrategy::Single, 7),
///     Some("+15550001")
/// );
/// ```
pub fn select_caller_id(
    pool: &[String],
    strategy: CallerIdStrategy,
    attempt: u64,
) -> Option<&str> {
    if pool.is_empty() {
        return None;
    }
    let index = match strategy {
        CallerIdStrategy::RoundRobin => (attempt % pool.len() as u64) as usize,
        CallerIdStrategy::Random => rand::thread_rng().gen_range(0..pool.len()),
        CallerIdStrategy::Single => 0,
    };
    Some(pool[index].as_str())
}
