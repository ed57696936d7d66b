//! Per-VM dispatcher slot.

use crate::host;
use log::{debug, warn};
use proxyvm_core::{
    install_root_factory, installed_root_factory, ContextHandle, DispatchError, DispatchResult,
    Dispatcher, FactoryError, HostAbi, RootContext, RootFactory,
};
use std::cell::RefCell;
use std::rc::Rc;

thread_local! {
    static RUNTIME: RefCell<Option<Dispatcher>> = const { RefCell::new(None) };
}

/// Installs the process-wide root factory.
///
/// Call once from the module's initialization export, before the host creates
/// the first root context.
///
/// # FFI contract
/// - Never panics.
/// - A second call keeps the first factory and returns `AlreadyInstalled`.
pub fn set_root_factory<F>(factory: F) -> Result<(), FactoryError>
where
    F: Fn(ContextHandle) -> Box<dyn RootContext> + Send + Sync + 'static,
{
    install_root_factory(factory)
}

/// Replaces this thread's runtime with one bound to `abi`.
///
/// Native embedders and tests use this instead of the wasm import table.
pub fn install_runtime(abi: Rc<dyn HostAbi>, factory: RootFactory) {
    let dispatcher = Dispatcher::new(abi, factory);
    RUNTIME.with(|slot| match slot.try_borrow_mut() {
        Ok(mut slot) => *slot = Some(dispatcher),
        Err(_) => warn!("event=runtime_install module=ffi status=error reason=busy"),
    });
}

pub fn uninstall_runtime() {
    RUNTIME.with(|slot| {
        if let Ok(mut slot) = slot.try_borrow_mut() {
            *slot = None;
        }
    });
}

pub fn runtime_installed() -> bool {
    RUNTIME.with(|slot| slot.try_borrow().map(|slot| slot.is_some()).unwrap_or(true))
}

/// Runs one host event against this thread's dispatcher.
///
/// The runtime is built lazily from the wasm host and the installed root
/// factory. Any failure is logged and answered with `neutral`.
pub(crate) fn dispatch<T>(
    event: &'static str,
    neutral: T,
    handler: impl FnOnce(&mut Dispatcher) -> DispatchResult<T>,
) -> T {
    RUNTIME.with(|slot| {
        let Ok(mut slot) = slot.try_borrow_mut() else {
            warn!(
                "event={} module=ffi status=error reason=reentrant_dispatch",
                event
            );
            return neutral;
        };
        if slot.is_none() {
            *slot = bootstrap();
        }
        let Some(dispatcher) = slot.as_mut() else {
            debug!("event={} module=ffi status=skipped reason=no_runtime", event);
            return neutral;
        };
        match handler(dispatcher) {
            Ok(value) => value,
            Err(err) => {
                report(event, &err);
                neutral
            }
        }
    })
}

fn bootstrap() -> Option<Dispatcher> {
    let factory = installed_root_factory()?;
    let abi = host::default_host()?;
    Some(Dispatcher::new(abi, factory))
}

fn report(event: &'static str, err: &DispatchError) {
    match err {
        DispatchError::Protocol(violation) => warn!(
            "event={} module=ffi status=protocol_violation error={}",
            event, violation
        ),
        // The dispatcher already logged the hook failure with its context.
        DispatchError::Hook { .. } => {
            debug!("event={} module=ffi status=neutral error={}", event, err)
        }
    }
}
