//! Process-wide root context factory.
//!
//! The guest's startup hook installs one factory; every root context the host
//! creates afterwards comes from it.

use crate::context::{ContextHandle, RootContext};
use once_cell::sync::OnceCell;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Builds the root context for a host-assigned handle.
pub type RootFactory = Arc<dyn Fn(ContextHandle) -> Box<dyn RootContext> + Send + Sync>;

static ROOT_FACTORY: OnceCell<RootFactory> = OnceCell::new();

/// Factory installation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactoryError {
    AlreadyInstalled,
}

impl Display for FactoryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyInstalled => write!(f, "root context factory already installed"),
        }
    }
}

impl Error for FactoryError {}

/// Installs the root factory exactly once.
///
/// # Errors
/// - Returns `AlreadyInstalled` on any second call; the first factory stays.
pub fn install_root_factory<F>(factory: F) -> Result<(), FactoryError>
where
    F: Fn(ContextHandle) -> Box<dyn RootContext> + Send + Sync + 'static,
{
    ROOT_FACTORY
        .set(Arc::new(factory))
        .map_err(|_| FactoryError::AlreadyInstalled)
}

pub fn installed_root_factory() -> Option<RootFactory> {
    ROOT_FACTORY.get().cloned()
}

#[cfg(test)]
mod tests {
    use super::{install_root_factory, installed_root_factory, FactoryError};
    use crate::context::{ContextHandle, RootContext};

    struct Probe;

    impl RootContext for Probe {}

    #[test]
    fn second_install_is_rejected() {
        let _ = install_root_factory(|_| Box::new(Probe) as Box<dyn RootContext>);
        assert_eq!(
            install_root_factory(|_| Box::new(Probe) as Box<dyn RootContext>),
            Err(FactoryError::AlreadyInstalled)
        );
        let factory = installed_root_factory().expect("factory installed");
        let root = factory(ContextHandle::new(1));
        assert!(root.child_kind().is_none());
    }
}
