use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tracing::trace;

use crate::{
    error::{Error, ExecResult},
    types::Value,
    util::lock::ChainId,
};

/// Variables of one block. Names are case-insensitive.
#[derive(Debug, Default)]
pub struct Scope {
    variables: HashMap<String, Value>,
}

impl Scope {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

/// The scopes of an execution thread.
///
/// The root scope lives as long as the thread and is shared by every run.
/// Scopes opened by a run (blocks, loops, nested runs) are stacked per call
/// chain, so that concurrent runs never see nor pop each other's.
#[derive(Debug, Default)]
pub struct ScopeStack {
    root: Scope,
    chains: HashMap<ChainId, Vec<Scope>>,
}

impl ScopeStack {
    fn frames(&self, chain: Option<ChainId>) -> impl Iterator<Item = &Scope> {
        let stacked = chain
            .and_then(|chain| self.chains.get(&chain))
            .map_or(&[][..], Vec::as_slice);
        stacked.iter().rev().chain(std::iter::once(&self.root))
    }

    /// Looks a variable up, innermost scope of `chain` first, the root one
    /// last. Without a chain, only the root scope is visible.
    pub fn get(&self, chain: Option<ChainId>, name: &str) -> Option<Value> {
        let key = name.to_ascii_lowercase();
        self.frames(chain)
            .find_map(|scope| scope.variables.get(&key))
            .cloned()
    }

    pub fn contains(&self, chain: Option<ChainId>, name: &str) -> bool {
        let key = name.to_ascii_lowercase();
        self.frames(chain)
            .any(|scope| scope.variables.contains_key(&key))
    }

    /// Overwrites the innermost variable called `name`.
    pub fn set(&mut self, chain: Option<ChainId>, name: &str, value: Value) -> ExecResult<()> {
        let key = name.to_ascii_lowercase();
        let stacked = chain.and_then(|chain| self.chains.get_mut(&chain));
        let slot = stacked
            .into_iter()
            .flat_map(|frames| frames.iter_mut().rev())
            .chain(std::iter::once(&mut self.root))
            .find_map(|scope| scope.variables.get_mut(&key))
            .ok_or_else(|| Error::CannotFindIdentifier(name.to_owned()))?;
        *slot = value;
        Ok(())
    }

    /// Defines (or redefines) a variable in the innermost scope.
    pub fn declare(&mut self, chain: Option<ChainId>, name: &str, value: Value) {
        let scope = chain
            .and_then(|chain| self.chains.get_mut(&chain))
            .and_then(|frames| frames.last_mut())
            .unwrap_or(&mut self.root);
        scope.variables.insert(name.to_ascii_lowercase(), value);
    }

    /// Number of scopes visible to `chain`, the root one included.
    pub fn depth(&self, chain: Option<ChainId>) -> usize {
        self.frames(chain).count()
    }

    pub fn root(&self) -> &Scope {
        &self.root
    }

    fn push(&mut self, chain: ChainId) -> usize {
        let frames = self.chains.entry(chain).or_default();
        frames.push(Scope::default());
        frames.len() - 1
    }

    fn truncate(&mut self, chain: ChainId, len: usize) {
        if let Some(frames) = self.chains.get_mut(&chain) {
            frames.truncate(len);
            if frames.is_empty() {
                self.chains.remove(&chain);
            }
        }
    }
}

/// Scopes shared by the thread handles.
pub(crate) type SharedScopes = Arc<Mutex<ScopeStack>>;

pub(crate) fn lock_scopes(scopes: &Mutex<ScopeStack>) -> MutexGuard<'_, ScopeStack> {
    scopes.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Pops the scope it was created with (and any scope its chain left above
/// it) when dropped, so that early exits, errors and jumps all clean up.
#[must_use]
pub struct ScopeGuard {
    scopes: SharedScopes,
    chain: ChainId,
    index: usize,
}

impl ScopeGuard {
    pub(crate) fn push(scopes: &SharedScopes, chain: ChainId) -> ScopeGuard {
        let index = lock_scopes(scopes).push(chain);
        trace!(%chain, depth = index + 1, "pushed scope");
        ScopeGuard {
            scopes: Arc::clone(scopes),
            chain,
            index,
        }
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        lock_scopes(&self.scopes).truncate(self.chain, self.index);
        trace!(chain = %self.chain, depth = self.index + 1, "popped scope");
    }
}
