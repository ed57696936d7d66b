//! Flat handle-to-context registry.

use crate::context::{ContextHandle, ContextKind, HttpContext, RootContext, TcpContext};
use crate::error::ProtocolViolation;
use std::collections::BTreeMap;

/// One live context with its hook table.
pub enum Context {
    Root(Box<dyn RootContext>),
    Http(Box<dyn HttpContext>),
    Tcp(Box<dyn TcpContext>),
}

impl Context {
    pub fn kind(&self) -> ContextKind {
        match self {
            Self::Root(_) => ContextKind::Root,
            Self::Http(_) => ContextKind::HttpFilter,
            Self::Tcp(_) => ContextKind::TcpFilter,
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Context::{}", self.kind())
    }
}

#[derive(Debug)]
struct ContextEntry {
    context: Context,
    /// Parent root for filter contexts; `None` for roots.
    root: Option<ContextHandle>,
}

/// Live contexts keyed by host handle.
#[derive(Debug, Default)]
pub struct ContextRegistry {
    entries: BTreeMap<ContextHandle, ContextEntry>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `context` under `handle`.
    ///
    /// Filter contexts must name a live root; roots must not name a parent.
    pub fn insert(
        &mut self,
        handle: ContextHandle,
        root: Option<ContextHandle>,
        context: Context,
    ) -> Result<(), ProtocolViolation> {
        if handle.is_reserved() {
            return Err(ProtocolViolation::InvalidHandle);
        }
        if self.entries.contains_key(&handle) {
            return Err(ProtocolViolation::HandleInUse(handle));
        }
        if let Some(root) = root {
            let actual = self.kind_of(root)?;
            if actual != ContextKind::Root {
                return Err(ProtocolViolation::KindMismatch {
                    handle: root,
                    expected: ContextKind::Root,
                    actual,
                });
            }
        }
        self.entries.insert(handle, ContextEntry { context, root });
        Ok(())
    }

    pub fn get_mut(&mut self, handle: ContextHandle) -> Result<&mut Context, ProtocolViolation> {
        self.entries
            .get_mut(&handle)
            .map(|entry| &mut entry.context)
            .ok_or(ProtocolViolation::UnknownContext(handle))
    }

    pub fn root_mut(
        &mut self,
        handle: ContextHandle,
    ) -> Result<&mut dyn RootContext, ProtocolViolation> {
        match self.get_mut(handle)? {
            Context::Root(root) => Ok(root.as_mut()),
            other => Err(mismatch(handle, ContextKind::Root, other.kind())),
        }
    }

    pub fn http_mut(
        &mut self,
        handle: ContextHandle,
    ) -> Result<&mut dyn HttpContext, ProtocolViolation> {
        match self.get_mut(handle)? {
            Context::Http(http) => Ok(http.as_mut()),
            other => Err(mismatch(handle, ContextKind::HttpFilter, other.kind())),
        }
    }

    pub fn tcp_mut(
        &mut self,
        handle: ContextHandle,
    ) -> Result<&mut dyn TcpContext, ProtocolViolation> {
        match self.get_mut(handle)? {
            Context::Tcp(tcp) => Ok(tcp.as_mut()),
            other => Err(mismatch(handle, ContextKind::TcpFilter, other.kind())),
        }
    }

    /// Removes `handle` and hands its context back for final teardown.
    pub fn remove(&mut self, handle: ContextHandle) -> Result<Context, ProtocolViolation> {
        self.entries
            .remove(&handle)
            .map(|entry| entry.context)
            .ok_or(ProtocolViolation::UnknownContext(handle))
    }

    pub fn contains(&self, handle: ContextHandle) -> bool {
        self.entries.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn handles(&self) -> Vec<ContextHandle> {
        self.entries.keys().copied().collect()
    }

    pub fn kind_of(&self, handle: ContextHandle) -> Result<ContextKind, ProtocolViolation> {
        self.entries
            .get(&handle)
            .map(|entry| entry.context.kind())
            .ok_or(ProtocolViolation::UnknownContext(handle))
    }

    /// Parent root of a filter context; `None` for roots.
    pub fn root_of(
        &self,
        handle: ContextHandle,
    ) -> Result<Option<ContextHandle>, ProtocolViolation> {
        self.entries
            .get(&handle)
            .map(|entry| entry.root)
            .ok_or(ProtocolViolation::UnknownContext(handle))
    }
}

fn mismatch(handle: ContextHandle, expected: ContextKind, actual: ContextKind) -> ProtocolViolation {
    ProtocolViolation::KindMismatch {
        handle,
        expected,
        actual,
    }
}
