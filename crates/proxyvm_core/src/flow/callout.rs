//! Ticket-to-phase correlation for outstanding callouts.

use crate::context::ContextHandle;
use crate::error::ProtocolViolation;
use crate::flow::StreamPhase;
use crate::marshal::CalloutTicket;
use std::collections::BTreeMap;

/// Issuer of one outstanding callout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCallout {
    pub context: ContextHandle,
    pub phase: StreamPhase,
}

/// Outstanding callouts keyed by ticket.
#[derive(Debug, Default)]
pub struct CalloutLedger {
    pending: BTreeMap<CalloutTicket, PendingCallout>,
}

impl CalloutLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        ticket: CalloutTicket,
        context: ContextHandle,
        phase: StreamPhase,
    ) -> Result<(), ProtocolViolation> {
        if self.pending.contains_key(&ticket) {
            return Err(ProtocolViolation::DuplicateTicket(ticket));
        }
        self.pending.insert(ticket, PendingCallout { context, phase });
        Ok(())
    }

    /// Consumes `ticket` and returns its issuer.
    pub fn consume(&mut self, ticket: CalloutTicket) -> Result<PendingCallout, ProtocolViolation> {
        self.pending
            .remove(&ticket)
            .ok_or(ProtocolViolation::UnknownTicket(ticket))
    }

    pub fn get(&self, ticket: CalloutTicket) -> Option<PendingCallout> {
        self.pending.get(&ticket).copied()
    }

    pub fn outstanding_for(&self, context: ContextHandle) -> usize {
        self.pending
            .values()
            .filter(|pending| pending.context == context)
            .count()
    }

    /// Drops every ticket issued by `context`; returns how many were dropped.
    pub fn purge(&mut self, context: ContextHandle) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, pending| pending.context != context);
        before - self.pending.len()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
