// ledger/src/lock/mod.rs
//! Per-principal serialization of balance-affecting requests.
//!
//! Acquisition never waits. A held lock means "busy" and the caller is
//! expected to retry at the transport layer.
pub mod memory;
pub mod postgres;
pub mod redis;

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::LedgerError;

pub use self::memory::MemoryPrincipalLock;
pub use self::postgres::PostgresPrincipalLock;
pub use self::redis::RedisPrincipalLock;

/// A held lock. Dropping an unreleased lease must still free the lock,
/// either immediately or through the backend's expiry.
#[async_trait]
pub trait Lease: Send {
    async fn release(&mut self) -> Result<(), LedgerError>;
}

#[async_trait]
pub trait PrincipalLock: Send + Sync {
    /// `Ok(None)` when another request holds the lock for `principal`.
    async fn try_acquire(&self, principal: &str) -> Result<Option<Box<dyn Lease>>, LedgerError>;
}

/// The inbound endpoint a request arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub path: String,
    pub method: String,
}

impl Route {
    pub fn new(path: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: method.into().to_ascii_uppercase(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MethodMatch {
    Any,
    Only(String),
    AllBut(String),
}

/// A path fragment that skips serialization, optionally only for some
/// methods. Written `path`, `path:GET` or `path:!POST`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exemption {
    pub path_fragment: String,
    pub methods: MethodMatch,
}

impl Exemption {
    pub fn any(path_fragment: &str) -> Self {
        Self {
            path_fragment: path_fragment.to_string(),
            methods: MethodMatch::Any,
        }
    }

    pub fn only(path_fragment: &str, method: &str) -> Self {
        Self {
            path_fragment: path_fragment.to_string(),
            methods: MethodMatch::Only(method.to_ascii_uppercase()),
        }
    }

    pub fn all_but(path_fragment: &str, method: &str) -> Self {
        Self {
            path_fragment: path_fragment.to_string(),
            methods: MethodMatch::AllBut(method.to_ascii_uppercase()),
        }
    }

    pub fn matches(&self, route: &Route) -> bool {
        if !route.path.contains(&self.path_fragment) {
            return false;
        }
        match &self.methods {
            MethodMatch::Any => true,
            MethodMatch::Only(m) => route.method == *m,
            MethodMatch::AllBut(m) => route.method != *m,
        }
    }

    /// Exemptions the wallet deployment ships with.
    pub fn defaults() -> Vec<Exemption> {
        let mut rules: Vec<Exemption> = [
            "/admin/",
            "sharereward",
            "/payments/deposit_funds_to_merchant/",
            "/payments/send_money_to_supplier/",
            "agent/creditaccount/",
            "agent/merchanttransactions/",
            "loyalty/balance/",
            "/oscar-wallet/wallet-balance/",
            "/oscar-wallet/beneficiary/",
            "/oscar-wallet/otp/",
            "/oscar-wallet/wallet-activity/",
            "/oscar-wallet/titlefetch/",
            "/oscar-wallet/wallet-withdraw-report/",
            "/oscar-wallet/current-balance/",
            "/oscar-wallet/single-payment/",
            "/oscar-wallet/banks/v2/",
            "/oscar-wallet/deposit-breakdown-report/",
        ]
        .into_iter()
        .map(Exemption::any)
        .collect();

        rules.push(Exemption::all_but("bills/billpay/", "POST"));
        rules.push(Exemption::all_but("api/sendmoney/v3/", "POST"));

        rules.extend([
            Exemption::only("/merchant/wallet/", "POST"),
            Exemption::only("merchant/list/telcos/", "POST"),
            Exemption::only("available/telcos/", "GET"),
            Exemption::only("recharge/v2/", "GET"),
            Exemption::only("deposit/v2/", "GET"),
            Exemption::only("/loan/agreement/", "GET"),
        ]);
        rules
    }
}

impl FromStr for Exemption {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (path, method) = match s.rsplit_once(':') {
            Some((path, method)) => (path.trim(), Some(method.trim())),
            None => (s, None),
        };
        if path.is_empty() {
            return Err(format!("empty path in exemption {s:?}"));
        }
        Ok(match method {
            None | Some("") => Exemption::any(path),
            Some(m) => match m.strip_prefix('!') {
                Some(negated) if !negated.is_empty() => Exemption::all_but(path, negated),
                Some(_) => return Err(format!("empty method in exemption {s:?}")),
                None => Exemption::only(path, m),
            },
        })
    }
}

/// Runs a request body inside the principal's lock.
#[derive(Clone)]
pub struct Serializer {
    lock: Arc<dyn PrincipalLock>,
    exemptions: Arc<Vec<Exemption>>,
}

impl Serializer {
    pub fn new(lock: Arc<dyn PrincipalLock>, exemptions: Vec<Exemption>) -> Self {
        Self {
            lock,
            exemptions: Arc::new(exemptions),
        }
    }

    pub fn is_exempt(&self, route: &Route) -> bool {
        self.exemptions.iter().any(|e| e.matches(route))
    }

    /// Run `f` holding the lock for `principal`. Fails with `Busy` without
    /// running `f` when the lock is held elsewhere. The lease is released
    /// whether `f` succeeds or fails; a release error is logged and does
    /// not replace the result of `f`.
    pub async fn run<F, Fut, T>(
        &self,
        route: &Route,
        principal: &str,
        f: F,
    ) -> Result<T, LedgerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        if principal.is_empty() || self.is_exempt(route) {
            debug!(path = %route.path, method = %route.method, "serialization skipped");
            return f().await;
        }

        let Some(mut lease) = self.lock.try_acquire(principal).await? else {
            counter!("ledger.serializer.busy.total").increment(1);
            info!(principal, path = %route.path, "principal busy");
            return Err(LedgerError::Busy(principal.to_string()));
        };

        let result = f().await;

        if let Err(err) = lease.release().await {
            warn!(principal, error = %err, "principal lock release failed");
        }
        result
    }
}
