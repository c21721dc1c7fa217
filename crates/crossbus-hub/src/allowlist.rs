//! Allowlist and selected-account stores.
//!
//! Both values are owned outside the bus. The hub reads whatever
//! snapshot the store returns at broadcast time and never writes;
//! there is no freshness guarantee beyond that snapshot.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crossbus_core::{AccountAddress, BusResult};

/// Origin URL → accounts authorized to interact with it.
pub type Allowlist = HashMap<String, HashSet<AccountAddress>>;

/// Read access to the persisted allowlist.
#[async_trait]
pub trait AllowlistStore: Send + Sync {
    async fn get(&self) -> BusResult<Allowlist>;
}

/// Read access to the externally selected account.
#[async_trait]
pub trait SelectedAccountStore: Send + Sync {
    async fn get(&self) -> BusResult<Option<AccountAddress>>;
}

/// Shared in-memory store. The demo and tests mutate it from outside
/// the bus, exactly like the real persisted stores would be mutated.
#[derive(Clone, Default)]
pub struct MemoryStores {
    inner: Arc<Mutex<StoreState>>,
}

#[derive(Default)]
struct StoreState {
    allowlist: Allowlist,
    selected: Option<AccountAddress>,
}

impl MemoryStores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Authorize `account` for `origin`.
    pub fn authorize(&self, origin: impl Into<String>, account: impl Into<AccountAddress>) {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .allowlist
            .entry(origin.into())
            .or_default()
            .insert(account.into());
    }

    /// Change the selected account.
    pub fn select(&self, account: Option<AccountAddress>) {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state.selected = account;
    }
}

#[async_trait]
impl AllowlistStore for MemoryStores {
    async fn get(&self) -> BusResult<Allowlist> {
        let state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(state.allowlist.clone())
    }
}

#[async_trait]
impl SelectedAccountStore for MemoryStores {
    async fn get(&self) -> BusResult<Option<AccountAddress>> {
        let state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(state.selected.clone())
    }
}
