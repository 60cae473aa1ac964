//! # Reactive Bindables
//!
//! A [`Bindable`] is a value plus the subscriptions watching it. Nodes own
//! bindables as ordinary fields and enumerate them through an explicit
//! registration hook, so teardown can find every subscription without any
//! runtime type introspection.
//!
//! Unbinding is best effort by contract: the disposer attempts every member
//! and swallows individual failures, so one stubborn member cannot leak its
//! siblings' subscriptions.

use crate::error::{CoreError, CoreResult};

/// Object-safe teardown surface of a bindable member.
///
/// Node types implement their `bindables()` registration hook by returning
/// one `&mut dyn AnyBindable` per reactive field, including inherited ones.
pub trait AnyBindable: Send {
    /// Diagnostic name, used when an unbind failure is logged.
    fn name(&self) -> &'static str;

    /// Whether any subscription is still attached.
    fn is_bound(&self) -> bool;

    /// Releases every subscription on this member.
    ///
    /// Must be safe to call repeatedly; after the first success the member
    /// reports `is_bound() == false` forever.
    ///
    /// # Errors
    ///
    /// Implementations may report a failure; the caller logs it and
    /// continues with the remaining members.
    fn unbind_all(&mut self) -> CoreResult<()>;
}

type ChangeCallback<T> = Box<dyn FnMut(&T) + Send + 'static>;

/// A value with change subscriptions.
///
/// # Example
///
/// ```rust,ignore
/// let mut health = Bindable::new("health", 100);
/// health.on_change(|value| println!("health is now {value}"));
/// health.set(75); // runs the callback
/// ```
pub struct Bindable<T: Send + 'static> {
    name: &'static str,
    value: T,
    subscribers: Vec<ChangeCallback<T>>,
}

impl<T: Send + 'static> Bindable<T> {
    /// Creates a bindable holding `value`.
    #[must_use]
    pub fn new(name: &'static str, value: T) -> Self {
        Self {
            name,
            value,
            subscribers: Vec::new(),
        }
    }

    /// Borrows the current value.
    #[inline]
    #[must_use]
    pub fn get(&self) -> &T {
        &self.value
    }

    /// Replaces the value and notifies every subscriber.
    pub fn set(&mut self, value: T) {
        self.value = value;
        for subscriber in &mut self.subscribers {
            subscriber(&self.value);
        }
    }

    /// Subscribes to future changes.
    pub fn on_change(&mut self, callback: impl FnMut(&T) + Send + 'static) {
        self.subscribers.push(Box::new(callback));
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl<T: Send + 'static> AnyBindable for Bindable<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn is_bound(&self) -> bool {
        !self.subscribers.is_empty()
    }

    fn unbind_all(&mut self) -> CoreResult<()> {
        self.subscribers.clear();
        Ok(())
    }
}

/// Runs `unbind_all` over a set of members, tolerating per-member failures.
///
/// Every member is attempted; failures are logged at `warn` level and
/// counted, never propagated. Returns the number of members that failed.
pub fn unbind_members(members: &mut [&mut dyn AnyBindable]) -> usize {
    let mut failures = 0;
    for member in members.iter_mut() {
        if let Err(error) = member.unbind_all() {
            failures += 1;
            let reason = match error {
                CoreError::UnbindFailed { reason, .. } => reason,
                other => other.to_string(),
            };
            tracing::warn!(
                "unbind of '{}' failed, continuing with remaining members: {}",
                member.name(),
                reason
            );
        }
    }
    failures
}
