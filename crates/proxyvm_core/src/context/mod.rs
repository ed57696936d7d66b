//! Extension contexts and their registry.
//!
//! # Responsibility
//! - Define the hook traits extensions implement per context kind.
//! - Track live contexts in one flat handle namespace.
//! - Hold the process-wide root factory.
//!
//! # Invariants
//! - A handle resolves to at most one live context.
//! - A context's hook table (its trait object) is fixed at construction.
//! - Deleted handles leave no entry behind and may be reused by the host.

mod factory;
mod hooks;
mod registry;

pub use factory::{install_root_factory, installed_root_factory, FactoryError, RootFactory};
pub use hooks::{HttpContext, InertHttpContext, InertTcpContext, RootContext, TcpContext};
pub use registry::{Context, ContextRegistry};

use std::fmt::{Display, Formatter};

/// Host-assigned context identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextHandle(u32);

impl ContextHandle {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    /// `0` marks "no parent" in context creation and is never a live handle.
    pub fn is_reserved(self) -> bool {
        self.0 == 0
    }
}

impl Display for ContextHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of a live context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    Root,
    HttpFilter,
    TcpFilter,
}

impl ContextKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::HttpFilter => "http",
            Self::TcpFilter => "tcp",
        }
    }
}

impl Display for ContextKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filter kind a root context produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    Http,
    Tcp,
}

impl FilterKind {
    pub fn context_kind(self) -> ContextKind {
        match self {
            Self::Http => ContextKind::HttpFilter,
            Self::Tcp => ContextKind::TcpFilter,
        }
    }
}
