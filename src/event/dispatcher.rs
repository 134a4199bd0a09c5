//! Event dispatcher, one per firewall plus one process-wide instance.

use std::sync::Arc;

use super::{EventKind, SecurityEvent};
use crate::error::ShieldResult;

/// Event kinds whose global listeners also observe firewall events.
pub const BUBBLED_EVENTS: [EventKind; 4] = [
    EventKind::CheckPassport,
    EventKind::LoginSuccess,
    EventKind::LoginFailure,
    EventKind::Logout,
];

/// Reacts to security events.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &mut SecurityEvent<'_>) -> ShieldResult<()>;
}

impl<F> EventListener for F
where
    F: Fn(&mut SecurityEvent<'_>) -> ShieldResult<()> + Send + Sync,
{
    fn on_event(&self, event: &mut SecurityEvent<'_>) -> ShieldResult<()> {
        self(event)
    }
}

#[derive(Clone)]
struct Registration {
    kind: EventKind,
    listener: Arc<dyn EventListener>,
    priority: i32,
}

/// Dispatches security events to listeners by descending priority.
///
/// Listeners sharing a priority run in registration order. Registration
/// happens while firewalls are built; dispatch only reads.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    registrations: Vec<Registration>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&mut self, kind: EventKind, listener: Arc<dyn EventListener>, priority: i32) {
        self.registrations.push(Registration {
            kind,
            listener,
            priority,
        });
        // stable: equal priorities keep registration order
        self.registrations.sort_by_key(|r| std::cmp::Reverse(r.priority));
    }

    /// Whether this exact listener instance is registered for `kind`.
    pub fn has_listener(&self, kind: EventKind, listener: &Arc<dyn EventListener>) -> bool {
        self.registrations
            .iter()
            .any(|r| r.kind == kind && same_listener(&r.listener, listener))
    }

    /// Listeners for `kind` with their priority, in call order.
    pub fn listeners(&self, kind: EventKind) -> Vec<(Arc<dyn EventListener>, i32)> {
        self.registrations
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| (r.listener.clone(), r.priority))
            .collect()
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.registrations.iter().filter(|r| r.kind == kind).count()
    }

    /// Call every listener registered for the event's kind.
    ///
    /// The first listener error aborts dispatch and is returned.
    pub fn dispatch(&self, event: &mut SecurityEvent<'_>) -> ShieldResult<()> {
        let kind = event.kind();
        for registration in self.registrations.iter().filter(|r| r.kind == kind) {
            registration.listener.on_event(event)?;
        }
        Ok(())
    }

    /// Copy the global listeners of bubbled event kinds into this dispatcher.
    ///
    /// Each global listener is added once with its original priority, even
    /// when it is registered several times globally or is already present.
    pub fn inherit_from(&mut self, global: &EventDispatcher) -> usize {
        let mut added = 0;
        for registration in &global.registrations {
            if !BUBBLED_EVENTS.contains(&registration.kind) {
                continue;
            }
            if self.has_listener(registration.kind, &registration.listener) {
                continue;
            }
            self.add_listener(
                registration.kind,
                registration.listener.clone(),
                registration.priority,
            );
            added += 1;
        }
        added
    }
}

fn same_listener(a: &Arc<dyn EventListener>, b: &Arc<dyn EventListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
