//! Identity rotation and proxy health tracking.
//!
//! Supplies a `(user_agent, proxy)` pair per request attempt, rotating to
//! spread load and to route around endpoints the upstream has started
//! blocking. Proxy health is the only state shared between concurrent
//! workers; it lives behind one pool-wide lock, held only for bookkeeping.

mod user_agents;

pub use user_agents::{FALLBACK_USER_AGENT, UserAgentRotator};

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use thiserror::Error;

/// Identity material for one outbound attempt.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_agent: String,
    /// `None` means a direct connection.
    pub proxy: Option<String>,
    /// Opaque session cookies, sent verbatim. The pool neither acquires nor
    /// refreshes them.
    pub cookies: HashMap<String, String>,
}

/// Lifecycle state of a proxy endpoint. Entries are only ever
/// state-transitioned, never removed, for the duration of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Active,
    Cooldown,
    Banned,
}

/// Health bookkeeping for one proxy endpoint.
#[derive(Debug, Clone)]
pub struct ProxyHealth {
    pub endpoint: String,
    pub state: ProxyState,
    pub success_count: u64,
    pub failure_count: u64,
    pub cooldown_until: Option<Instant>,
    /// Consecutive hard blocks within the current cooldown cycle.
    hard_block_streak: u32,
}

impl ProxyHealth {
    fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            state: ProxyState::Active,
            success_count: 0,
            failure_count: 0,
            cooldown_until: None,
            hard_block_streak: 0,
        }
    }

    /// Lazily move an expired cooldown back to `Active`. A fresh cycle
    /// starts, so the hard-block streak resets.
    fn refresh(&mut self, now: Instant) {
        if self.state == ProxyState::Cooldown
            && let Some(until) = self.cooldown_until
            && now >= until
        {
            self.state = ProxyState::Active;
            self.cooldown_until = None;
            self.hard_block_streak = 0;
        }
    }

    fn selectable(&self) -> bool {
        self.state == ProxyState::Active
    }
}

/// Signal reported back to the pool after each attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportSignal {
    Success,
    TransientFailure,
    HardBlock,
}

#[derive(Debug, Error)]
pub enum PoolError {
    /// Every proxy is banned; the run cannot proceed with any usable
    /// identity, and retrying cannot change that.
    #[error("identity pool exhausted: all {banned} proxies banned")]
    Exhausted { banned: usize },
    /// Every non-banned proxy is cooling down. Recoverable: the caller may
    /// back off and try again once a cooldown elapses.
    #[error("all usable proxies cooling down; next available in {next_available:?}")]
    CoolingDown { next_available: Duration },
}

#[derive(Debug)]
struct PoolState {
    proxies: Vec<ProxyHealth>,
    cursor: usize,
    agents: UserAgentRotator,
}

/// Shared identity pool. Safe for use by multiple concurrent workers; a ban
/// decision made by one worker is immediately visible to the rest.
#[derive(Debug)]
pub struct IdentityPool {
    state: Mutex<PoolState>,
    cookies: HashMap<String, String>,
    cooldown: Duration,
    ban_threshold: u32,
}

impl IdentityPool {
    pub fn new(
        proxies: Vec<String>,
        user_agents: Vec<String>,
        cookies: HashMap<String, String>,
        cooldown: Duration,
        ban_threshold: u32,
    ) -> Self {
        let mut entries = Vec::with_capacity(proxies.len());
        for endpoint in proxies {
            if entries
                .iter()
                .any(|existing: &ProxyHealth| existing.endpoint == endpoint)
            {
                continue;
            }
            entries.push(ProxyHealth::new(endpoint));
        }
        info!(
            "identity pool initialised with {} proxies, {} session cookies",
            entries.len(),
            cookies.len()
        );
        Self {
            state: Mutex::new(PoolState {
                proxies: entries,
                cursor: 0,
                agents: UserAgentRotator::new(user_agents),
            }),
            cookies,
            cooldown,
            ban_threshold,
        }
    }

    /// Select an identity for the next attempt.
    ///
    /// Round-robin among `Active` proxies, lazily reactivating any whose
    /// cooldown has elapsed first. A proxy in `Cooldown` or `Banned` state is
    /// never returned early. With an empty proxy list a direct-connection
    /// identity with a rotated user agent is returned.
    pub fn select(&self) -> Result<Identity, PoolError> {
        let mut state = self.state.lock().expect("identity pool lock poisoned");
        let user_agent = state.agents.next();

        if state.proxies.is_empty() {
            return Ok(Identity {
                user_agent,
                proxy: None,
                cookies: self.cookies.clone(),
            });
        }

        let now = Instant::now();
        for proxy in &mut state.proxies {
            proxy.refresh(now);
        }

        let len = state.proxies.len();
        for offset in 0..len {
            let index = (state.cursor + offset) % len;
            if state.proxies[index].selectable() {
                state.cursor = (index + 1) % len;
                let endpoint = state.proxies[index].endpoint.clone();
                debug!("selected proxy {endpoint}");
                return Ok(Identity {
                    user_agent,
                    proxy: Some(endpoint),
                    cookies: self.cookies.clone(),
                });
            }
        }

        let banned = state
            .proxies
            .iter()
            .filter(|proxy| proxy.state == ProxyState::Banned)
            .count();
        if banned == len {
            return Err(PoolError::Exhausted { banned });
        }

        let next_available = state
            .proxies
            .iter()
            .filter_map(|proxy| proxy.cooldown_until)
            .min()
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or_default();
        Err(PoolError::CoolingDown { next_available })
    }

    /// Report the outcome of an attempt made through `proxy`.
    ///
    /// A hard block puts the proxy into `Cooldown`; the third consecutive
    /// hard block within one cooldown cycle escalates it to `Banned` for the
    /// remainder of the run.
    pub fn report(&self, proxy: &str, signal: ReportSignal) {
        let mut state = self.state.lock().expect("identity pool lock poisoned");
        let Some(entry) = state
            .proxies
            .iter_mut()
            .find(|entry| entry.endpoint == proxy)
        else {
            return;
        };

        match signal {
            ReportSignal::Success => {
                entry.success_count += 1;
                entry.hard_block_streak = 0;
            }
            ReportSignal::TransientFailure => {
                entry.failure_count += 1;
            }
            ReportSignal::HardBlock => {
                entry.failure_count += 1;
                entry.hard_block_streak += 1;
                if entry.hard_block_streak >= self.ban_threshold {
                    warn!("proxy {} banned after {} consecutive hard blocks", proxy, entry.hard_block_streak);
                    entry.state = ProxyState::Banned;
                    entry.cooldown_until = None;
                } else {
                    debug!("proxy {proxy} cooling down after hard block");
                    entry.state = ProxyState::Cooldown;
                    entry.cooldown_until = Some(Instant::now() + self.cooldown);
                }
            }
        }
    }

    /// Snapshot of every proxy's health, for observability.
    pub fn health(&self) -> Vec<ProxyHealth> {
        let state = self.state.lock().expect("identity pool lock poisoned");
        state.proxies.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with(proxies: &[&str], cooldown: Duration) -> IdentityPool {
        IdentityPool::new(
            proxies.iter().map(|p| p.to_string()).collect(),
            Vec::new(),
            HashMap::new(),
            cooldown,
            3,
        )
    }

    #[test]
    fn empty_pool_yields_direct_identity() {
        let pool = pool_with(&[], Duration::from_secs(60));
        let identity = pool.select().unwrap();
        assert!(identity.proxy.is_none());
        assert!(!identity.user_agent.is_empty());
    }

    #[test]
    fn round_robin_over_active_proxies() {
        let pool = pool_with(&["http://a:1", "http://b:1"], Duration::from_secs(60));
        let first = pool.select().unwrap().proxy.unwrap();
        let second = pool.select().unwrap().proxy.unwrap();
        let third = pool.select().unwrap().proxy.unwrap();
        assert_ne!(first, second);
        assert_eq!(first, third);
    }

    #[test]
    fn hard_block_excludes_proxy_for_cooldown() {
        let pool = pool_with(&["http://a:1", "http://b:1"], Duration::from_secs(3600));
        pool.report("http://a:1", ReportSignal::HardBlock);
        for _ in 0..4 {
            let identity = pool.select().unwrap();
            assert_eq!(identity.proxy.as_deref(), Some("http://b:1"));
        }
    }

    #[test]
    fn cooldown_expiry_restores_eligibility() {
        let pool = pool_with(&["http://a:1"], Duration::from_millis(0));
        pool.report("http://a:1", ReportSignal::HardBlock);
        // Zero cooldown elapses immediately; lazy refresh reactivates.
        let identity = pool.select().unwrap();
        assert_eq!(identity.proxy.as_deref(), Some("http://a:1"));
    }

    #[test]
    fn three_consecutive_hard_blocks_ban() {
        let pool = pool_with(&["http://a:1"], Duration::from_secs(3600));
        for _ in 0..3 {
            pool.report("http://a:1", ReportSignal::HardBlock);
        }
        assert!(matches!(
            pool.select(),
            Err(PoolError::Exhausted { banned: 1 })
        ));
        let health = pool.health();
        assert_eq!(health[0].state, ProxyState::Banned);
        assert_eq!(health[0].failure_count, 3);
    }

    #[test]
    fn success_resets_hard_block_streak() {
        let pool = pool_with(&["http://a:1"], Duration::from_millis(0));
        pool.report("http://a:1", ReportSignal::HardBlock);
        pool.select().unwrap();
        pool.report("http://a:1", ReportSignal::Success);
        pool.report("http://a:1", ReportSignal::HardBlock);
        pool.report("http://a:1", ReportSignal::HardBlock);
        // Streak is 2, not 3: the proxy cooled down, not banned.
        let health = pool.health();
        assert_eq!(health[0].state, ProxyState::Cooldown);
    }

    #[test]
    fn cooling_pool_reports_recoverable_error() {
        let pool = pool_with(&["http://a:1"], Duration::from_secs(3600));
        pool.report("http://a:1", ReportSignal::HardBlock);
        assert!(matches!(pool.select(), Err(PoolError::CoolingDown { .. })));
    }
}
