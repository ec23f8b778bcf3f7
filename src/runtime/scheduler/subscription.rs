//! Subscriptions: the externally held cancellation handle of a task.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::task::{TaskId, TaskState};
use super::Shared;
use crate::runtime::errors::{InvalidTransition, ValidationError};
use crate::util::config::Config;

type Disposer = Box<dyn FnOnce()>;

/// Sets the flag when dropped, including during unwinding.
struct RaiseOnDrop<'a>(&'a Cell<bool>);

impl Drop for RaiseOnDrop<'_> {
    fn drop(&mut self) {
        self.0.set(true);
    }
}

/// State shared between every clone of a [`Subscription`] and the
/// scheduler's arena record of the task.
pub(crate) struct SubscriptionCore {
    task: Option<TaskId>,
    name: Option<String>,
    scheduler: Weak<Shared>,
    validate: bool,
    state: Cell<TaskState>,
    /// Set before any cancellation work starts; guards re-entry.
    cancel_requested: Cell<bool>,
    /// Set after the task is terminal and the disposer has run.
    cancelled: Cell<bool>,
    disposer: RefCell<Option<Disposer>>,
}

impl SubscriptionCore {
    pub(crate) fn for_task(
        task: TaskId,
        name: Option<String>,
        scheduler: Weak<Shared>,
        validate: bool,
    ) -> Self {
        Self {
            task: Some(task),
            name,
            scheduler,
            validate,
            state: Cell::new(TaskState::Created),
            cancel_requested: Cell::new(false),
            cancelled: Cell::new(false),
            disposer: RefCell::new(None),
        }
    }

    fn detached(validate: bool) -> Self {
        Self {
            task: None,
            name: None,
            scheduler: Weak::new(),
            validate,
            state: Cell::new(TaskState::Created),
            cancel_requested: Cell::new(false),
            cancelled: Cell::new(false),
            disposer: RefCell::new(None),
        }
    }

    #[inline]
    pub(crate) fn task(&self) -> Option<TaskId> {
        self.task
    }

    #[inline]
    pub(crate) fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[inline]
    pub(crate) fn state(&self) -> TaskState {
        self.state.get()
    }

    #[inline]
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }

    #[inline]
    pub(crate) fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.get()
    }

    pub(crate) fn transition(
        &self,
        to: TaskState,
    ) -> Result<(), InvalidTransition> {
        let from = self.state.get();
        if from.can_transition_to(to) {
            self.state.set(to);
            Ok(())
        } else {
            Err(InvalidTransition {
                task: self.task.unwrap_or(TaskId(usize::MAX)),
                from,
                to,
            })
        }
    }

    /// Cancel, cascading through the owning scheduler when there is one.
    pub(crate) fn cancel(self: &Rc<Self>) {
        if self.cancelled.get() || self.cancel_requested.replace(true) {
            return;
        }
        match (self.task, self.scheduler.upgrade()) {
            (Some(_), Some(shared)) => shared.cancel_task(self),
            _ => {
                // No scheduler to cascade through: finalize locally.
                if !self.state().is_terminal() {
                    let _ = self.transition(TaskState::Cancelled);
                }
                self.finish_cancel();
            }
        }
    }

    /// Run the disposer and raise the cancelled flag. The task, if any, is
    /// already terminal or gone from the arena.
    ///
    /// The flag is raised even if the disposer panics.
    pub(crate) fn finish_cancel(&self) {
        if self.cancelled.get() {
            return;
        }
        let _raise = RaiseOnDrop(&self.cancelled);
        let disposer = self.disposer.borrow_mut().take();
        if let Some(disposer) = disposer {
            disposer();
        }
    }

    fn describe(&self) -> String {
        match (self.task, &self.name) {
            (Some(_), Some(name)) => format!("Subscription[{}]", name),
            (Some(task), None) => format!("Subscription[{}]", task),
            (None, _) => "Subscription[detached]".to_string(),
        }
    }
}

/// Cancellation handle for one task or one external registration.
///
/// Clones refer to the same subscription.
#[derive(Clone)]
pub struct Subscription {
    core: Rc<SubscriptionCore>,
}

impl Subscription {
    pub(crate) fn from_core(core: Rc<SubscriptionCore>) -> Self {
        Self { core }
    }

    /// Subscription not tied to any task, e.g. for an external resource that
    /// only needs a disposer.
    pub fn detached(config: &Config) -> Self {
        Self {
            core: Rc::new(SubscriptionCore::detached(config.validate_subscriptions())),
        }
    }

    /// Detached subscription that runs `disposer` on cancellation.
    pub fn with_disposer<F>(
        config: &Config,
        disposer: F,
    ) -> Self
    where
        F: FnOnce() + 'static,
    {
        let subscription = Self::detached(config);
        *subscription.core.disposer.borrow_mut() = Some(Box::new(disposer));
        subscription
    }

    /// Cancel the subscription and, for a task, every descendant task.
    ///
    /// Idempotent. When this returns, the task and all its descendants are
    /// terminal and every disposer involved has run.
    pub fn cancel(&self) {
        self.core.cancel();
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.core.is_cancelled()
    }

    /// Register the action run on cancellation.
    ///
    /// With validation enabled, registering on a cancelled subscription or
    /// registering twice is an error. Without validation both are ignored and
    /// the disposer is dropped without running.
    pub fn add_disposer<F>(
        &self,
        disposer: F,
    ) -> Result<(), ValidationError>
    where
        F: FnOnce() + 'static,
    {
        if self.core.is_cancelled() || self.core.is_cancel_requested() {
            if self.core.validate {
                return Err(ValidationError::DisposerOnCancelled {
                    subscription: self.core.describe(),
                });
            }
            return Ok(());
        }
        let mut slot = self.core.disposer.borrow_mut();
        if slot.is_some() {
            if self.core.validate {
                return Err(ValidationError::DuplicateDisposer {
                    subscription: self.core.describe(),
                });
            }
            return Ok(());
        }
        *slot = Some(Box::new(disposer));
        Ok(())
    }

    /// Whether a disposer is waiting to run.
    pub fn has_disposer(&self) -> bool {
        self.core.disposer.borrow().is_some()
    }

    /// The task behind this subscription, if any.
    #[inline]
    pub fn task_id(&self) -> Option<TaskId> {
        self.core.task()
    }

    /// Name retained for the task, if names are enabled.
    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.core.name()
    }

    /// Last observed state of the task. Detached subscriptions move from
    /// `Created` to `Cancelled`.
    #[inline]
    pub fn state(&self) -> TaskState {
        self.core.state()
    }

    /// Whether both handles refer to the same subscription.
    pub fn ptr_eq(
        &self,
        other: &Subscription,
    ) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("task", &self.core.task)
            .field("name", &self.core.name)
            .field("state", &self.core.state())
            .field("cancelled", &self.core.is_cancelled())
            .finish()
    }
}

impl fmt::Display for Subscription {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.core.describe())
    }
}
