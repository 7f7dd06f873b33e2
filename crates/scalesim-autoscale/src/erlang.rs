//! Erlang-B and Erlang-C sizing formulas.
//!
//! Blocking probabilities use the recursive form of Erlang-B, which stays
//! finite for large server counts where the factorial form overflows.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use scalesim_core::{SimError, SimResult};

/// Upper bound on any server-count search.
pub const SEARCH_BOUND: u32 = 100_000;

/// Erlang-B blocking probability for `load` Erlangs offered to `servers`
/// servers. Zero load never blocks.
pub fn erlang_b(load: f64, servers: u32) -> f64 {
    if load == 0.0 {
        return 0.0;
    }
    let mut s = 0.0;
    for i in 1..=servers {
        s = (1.0 + s) * (f64::from(i) / load);
    }
    1.0 / (1.0 + s)
}

/// Erlang-C probability that an arrival has to queue. Saturated systems
/// (`servers <= load`) always queue.
pub fn erlang_c(load: f64, servers: u32) -> f64 {
    let n = f64::from(servers);
    if n <= load {
        return 1.0;
    }
    let b = erlang_b(load, servers);
    n * b / (n - load * (1.0 - b))
}

/// Erlang-C service level `P(wait <= target)`.
pub fn erlang_c_service_level(target: f64, lambda: f64, avg_service: f64, servers: u32) -> f64 {
    if lambda == 0.0 {
        return 1.0;
    }
    let load = lambda * avg_service;
    let exponent = -(f64::from(servers) - load) * (target / avg_service);
    1.0 - erlang_c(load, servers) * exponent.exp()
}

/// Smallest VM count whose Erlang-B blocking probability, with `density`
/// seats per VM, falls below `worst_bp`.
pub fn min_servers_erlang_b(load: f64, density: u32, worst_bp: f64) -> SimResult<u32> {
    for servers in 0..=SEARCH_BOUND {
        if erlang_b(load, servers.saturating_mul(density)) < worst_bp {
            return Ok(servers);
        }
    }
    Err(SimError::SearchDiverged {
        what: "erlang-b server count",
        bound: SEARCH_BOUND,
    })
}

#[derive(Debug, Serialize, Deserialize)]
struct MemoEntry {
    service_level: f64,
    target_wait: f64,
    lambda: f64,
    seats: u32,
}

/// Memo of Erlang-C minimum seat counts keyed by the exact
/// `(service_level, target_wait, lambda)` tuple.
#[derive(Debug, Default)]
pub struct ErlangCMemo {
    entries: HashMap<(u64, u64, u64), u32>,
}

impl ErlangCMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a memo file. A missing file yields an empty memo.
    pub fn load(path: &Path) -> SimResult<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(e.into()),
        };
        let entries: Vec<MemoEntry> = serde_json::from_str(&content)
            .map_err(|e| SimError::Config(format!("erlang-c memo {}: {e}", path.display())))?;
        let mut memo = Self::new();
        for entry in entries {
            memo.entries.insert(
                key(entry.service_level, entry.target_wait, entry.lambda),
                entry.seats,
            );
        }
        debug!(path = %path.display(), entries = memo.len(), "loaded erlang-c memo");
        Ok(memo)
    }

    pub fn save(&self, path: &Path) -> SimResult<()> {
        let mut entries: Vec<MemoEntry> = self
            .entries
            .iter()
            .map(|(&(s, t, l), &seats)| MemoEntry {
                service_level: f64::from_bits(s),
                target_wait: f64::from_bits(t),
                lambda: f64::from_bits(l),
                seats,
            })
            .collect();
        entries.sort_by(|a, b| a.lambda.total_cmp(&b.lambda));
        let json = serde_json::to_string_pretty(&entries)
            .map_err(|e| SimError::Config(format!("erlang-c memo: {e}")))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Smallest seat count with `P(wait <= target_wait) >= service_level`.
    /// The search starts at the offered load, rounded up.
    pub fn min_seats(
        &mut self,
        service_level: f64,
        target_wait: f64,
        lambda: f64,
        avg_service: f64,
    ) -> SimResult<u32> {
        let k = key(service_level, target_wait, lambda);
        if let Some(seats) = self.entries.get(&k) {
            return Ok(*seats);
        }
        let start = (lambda * avg_service).ceil().max(0.0) as u32;
        for seats in start..=start.saturating_add(SEARCH_BOUND) {
            if erlang_c_service_level(target_wait, lambda, avg_service, seats) >= service_level {
                self.entries.insert(k, seats);
                return Ok(seats);
            }
        }
        Err(SimError::SearchDiverged {
            what: "erlang-c seat count",
            bound: SEARCH_BOUND,
        })
    }
}

fn key(service_level: f64, target_wait: f64, lambda: f64) -> (u64, u64, u64) {
    (service_level.to_bits(), target_wait.to_bits(), lambda.to_bits())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_load_never_blocks() {
        for servers in [0, 1, 5, 1000] {
            assert_eq!(erlang_b(0.0, servers), 0.0);
        }
    }

    #[test]
    fn erlang_b_known_values() {
        // One Erlang on one server blocks half the time.
        assert!((erlang_b(1.0, 1) - 0.5).abs() < 1e-12);
        // B(2, 2) = 2 / 5.
        assert!((erlang_b(2.0, 2) - 0.4).abs() < 1e-12);
        assert_eq!(erlang_b(3.0, 0), 1.0);
    }

    #[test]
    fn erlang_b_is_finite_for_large_server_counts() {
        let bp = erlang_b(500.0, 2_000);
        assert!(bp.is_finite());
        assert!(bp < 1e-12);
    }

    #[test]
    fn min_servers_accounts_for_density() {
        // 1 Erlang: B(1, 4) = 1/65 < 0.02, B(1, 3) = 1/16 > 0.02.
        assert_eq!(min_servers_erlang_b(1.0, 1, 0.02).unwrap(), 4);
        assert_eq!(min_servers_erlang_b(1.0, 2, 0.02).unwrap(), 2);
        assert_eq!(min_servers_erlang_b(0.0, 1, 0.01).unwrap(), 0);
    }

    #[test]
    fn erlang_c_saturates_at_load() {
        assert_eq!(erlang_c(4.0, 4), 1.0);
        // C(1, 2) = 1/3.
        assert!((erlang_c(1.0, 2) - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn service_level_of_idle_system_is_one() {
        assert_eq!(erlang_c_service_level(15.0, 0.0, 100.0, 0), 1.0);
        let low = erlang_c_service_level(15.0, 0.1, 100.0, 11);
        let high = erlang_c_service_level(15.0, 0.1, 100.0, 20);
        assert!(low < high);
        assert!(high <= 1.0);
    }

    #[test]
    fn memo_returns_cached_seats() {
        let mut memo = ErlangCMemo::new();
        let seats = memo.min_seats(0.99, 15.0, 0.1, 100.0).unwrap();
        assert!(seats >= 10);
        assert!(erlang_c_service_level(15.0, 0.1, 100.0, seats) >= 0.99);
        assert!(erlang_c_service_level(15.0, 0.1, 100.0, seats - 1) < 0.99);
        assert_eq!(memo.len(), 1);
        assert_eq!(memo.min_seats(0.99, 15.0, 0.1, 100.0).unwrap(), seats);
        assert_eq!(memo.len(), 1);
    }

    #[test]
    fn memo_survives_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memo.json");
        assert!(ErlangCMemo::load(&path).unwrap().is_empty());

        let mut memo = ErlangCMemo::new();
        let seats = memo.min_seats(0.99, 15.0, 0.05, 60.0).unwrap();
        memo.save(&path).unwrap();

        let mut reloaded = ErlangCMemo::load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.min_seats(0.99, 15.0, 0.05, 60.0).unwrap(), seats);
    }
}
