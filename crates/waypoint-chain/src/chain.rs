//! The phased interceptor chain.
//!
//! A [`PhaseInterceptorChain`] owns a linearized list of interceptors and an
//! index cursor. It is built per exchange, driven forward by
//! [`do_intercept`](PhaseInterceptorChain::do_intercept), and may be parked by
//! an interceptor and continued from any task with
//! [`resume`](InterceptorChain::resume).
//!
//! ## Execution
//!
//! 1. Interceptors run in order; each one may add interceptors to the
//!    unexecuted remainder, request a pause, or abort.
//! 2. A returned [`Fault`], or a panic inside `handle_message`, stops forward
//!    iteration. `handle_fault` runs on the faulting interceptor and then on
//!    every earlier executed interceptor in reverse. The fault observer then
//!    receives the message, unless the exchange is one-way.
//! 3. A pause takes effect once the running interceptor returns. The message
//!    is parked inside the chain until `resume()` takes it back out.
//!
//! The lock guarding the cursor is never held across an interceptor call, so
//! interceptors may call back into the chain freely.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;
use waypoint_core::{
    BoxFuture, ChainError, ChainOutcome, ChainState, ConfigurationError, Fault, FaultListener,
    FaultMode, FaultObserver, Interceptor, InterceptorChain, Message, MessageRole, PhaseRegistry,
};
use waypoint_telemetry::metrics as telemetry;

use crate::cache::ChainTemplate;
use crate::linearize::{linearize, linearize_from};

/// A unique identifier for a chain instance, using UUID v7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainId(Uuid);

impl ChainId {
    /// Creates a new time-ordered chain id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ChainId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PauseKind {
    /// Continue with the next interceptor.
    Pause,
    /// Re-run the current interceptor.
    Suspend,
}

/// Where `do_intercept` starts.
enum Start<'a> {
    Head,
    At(&'a str),
    After(&'a str),
}

struct Inner {
    entries: Vec<Arc<dyn Interceptor>>,
    /// Index of the next interceptor to run.
    next: usize,
    /// Index execution started from.
    first: usize,
    /// Index of the running interceptor.
    current: Option<usize>,
    state: ChainState,
    pause: Option<PauseKind>,
    /// `resume()` arrived before the pausing task parked the message.
    resume_pending: bool,
    abort_requested: bool,
    parked: Option<Message>,
    faulted_at: Option<String>,
}

impl Inner {
    fn new(entries: Vec<Arc<dyn Interceptor>>) -> Self {
        Self {
            entries,
            next: 0,
            first: 0,
            current: None,
            state: ChainState::Idle,
            pause: None,
            resume_pending: false,
            abort_requested: false,
            parked: None,
            faulted_at: None,
        }
    }

    fn position(&self, id: &str) -> Result<usize, ChainError> {
        self.entries
            .iter()
            .position(|interceptor| interceptor.id() == id)
            .ok_or_else(|| ChainError::InterceptorNotFound(id.to_string()))
    }

    fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|interceptor| interceptor.id() == id)
    }
}

/// What the driver does next; computed under the lock, acted on outside it.
enum Step {
    Run {
        index: usize,
        interceptor: Arc<dyn Interceptor>,
        message: Message,
    },
    Parked,
    Complete(Message),
    Aborted(Message),
}

/// A chain of interceptors ordered by phase and same-phase constraints.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use waypoint_chain::PhaseInterceptorChain;
/// use waypoint_core::{Message, PhaseRegistry};
///
/// let phases = Arc::new(PhaseRegistry::default_inbound());
/// let chain = Arc::new(PhaseInterceptorChain::with_interceptors(phases, interceptors)?);
///
/// match chain.do_intercept(message).await? {
///     ChainOutcome::Complete(message) => respond(message),
///     ChainOutcome::Paused => { /* another task will resume */ }
///     other => handle(other),
/// }
/// ```
pub struct PhaseInterceptorChain {
    id: ChainId,
    phases: Arc<PhaseRegistry>,
    inner: Mutex<Inner>,
    fault_observer: RwLock<Option<Arc<dyn FaultObserver>>>,
}

impl PhaseInterceptorChain {
    /// Creates an empty chain over the given phases.
    #[must_use]
    pub fn new(phases: Arc<PhaseRegistry>) -> Self {
        Self::from_linearized(phases, Vec::new())
    }

    /// Creates a chain and linearizes `interceptors` into it.
    pub fn with_interceptors(
        phases: Arc<PhaseRegistry>,
        interceptors: Vec<Arc<dyn Interceptor>>,
    ) -> Result<Self, ConfigurationError> {
        let entries = linearize(&phases, interceptors)?;
        Ok(Self::from_linearized(phases, entries))
    }

    pub(crate) fn from_linearized(
        phases: Arc<PhaseRegistry>,
        entries: Vec<Arc<dyn Interceptor>>,
    ) -> Self {
        Self {
            id: ChainId::new(),
            phases,
            inner: Mutex::new(Inner::new(entries)),
            fault_observer: RwLock::new(None),
        }
    }

    /// Returns the chain id.
    #[must_use]
    pub const fn id(&self) -> ChainId {
        self.id
    }

    /// Returns the phases this chain orders by.
    #[must_use]
    pub fn phases(&self) -> &Arc<PhaseRegistry> {
        &self.phases
    }

    /// Number of interceptors in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns true if the chain holds no interceptors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Id of the interceptor whose fault aborted the last run.
    #[must_use]
    pub fn faulted_at(&self) -> Option<String> {
        self.inner.lock().faulted_at.clone()
    }

    /// Snapshot of the current linearization.
    #[must_use]
    pub fn template(&self) -> ChainTemplate {
        ChainTemplate::new(Arc::clone(&self.phases), self.inner.lock().entries.clone())
    }

    /// Adds a whole contribution list with a single linearization.
    ///
    /// Interceptors whose id is already present, or repeated within the list,
    /// are skipped.
    pub fn add_all<I>(&self, interceptors: I) -> Result<(), ConfigurationError>
    where
        I: IntoIterator<Item = Arc<dyn Interceptor>>,
    {
        self.splice(interceptors.into_iter().collect(), false)
    }

    /// Rewinds a finished or unstarted chain so it can run again.
    pub fn reset(&self) -> Result<(), ChainError> {
        let mut inner = self.inner.lock();
        if matches!(inner.state, ChainState::Running | ChainState::Paused) {
            return Err(ChainError::invalid_state("reset", inner.state));
        }
        let entries = std::mem::take(&mut inner.entries);
        *inner = Inner::new(entries);
        Ok(())
    }

    /// Runs `message` through the chain from the first interceptor.
    ///
    /// Only an idle chain can start; use [`reset`](Self::reset) to run again.
    pub fn do_intercept(
        self: &Arc<Self>,
        message: Message,
    ) -> BoxFuture<'static, Result<ChainOutcome, ChainError>> {
        self.start(message, Start::Head)
    }

    /// Runs `message` starting with the interceptor after `id`.
    pub fn do_intercept_starting_after(
        self: &Arc<Self>,
        message: Message,
        id: &str,
    ) -> BoxFuture<'static, Result<ChainOutcome, ChainError>> {
        self.start(message, Start::After(id))
    }

    /// Runs `message` starting with the interceptor `id`.
    pub fn do_intercept_starting_at(
        self: &Arc<Self>,
        message: Message,
        id: &str,
    ) -> BoxFuture<'static, Result<ChainOutcome, ChainError>> {
        self.start(message, Start::At(id))
    }

    fn start(
        self: &Arc<Self>,
        mut message: Message,
        start: Start<'_>,
    ) -> BoxFuture<'static, Result<ChainOutcome, ChainError>> {
        let begun = self.begin(start);
        let chain = Arc::clone(self);
        Box::pin(async move {
            begun?;
            let attached: Arc<dyn InterceptorChain> = Arc::clone(&chain) as Arc<dyn InterceptorChain>;
            message.set_interceptor_chain(attached);
            chain.run(message).await
        })
    }

    fn begin(&self, start: Start<'_>) -> Result<(), ChainError> {
        let mut inner = self.inner.lock();
        if inner.state != ChainState::Idle {
            return Err(ChainError::invalid_state("do_intercept", inner.state));
        }
        let position = match start {
            Start::Head => 0,
            Start::At(id) => inner.position(id)?,
            Start::After(id) => inner.position(id)? + 1,
        };
        inner.next = position;
        inner.first = position;
        inner.state = ChainState::Running;
        Ok(())
    }

    /// Drives the chain until it completes, parks, or aborts.
    fn run(self: Arc<Self>, message: Message) -> BoxFuture<'static, Result<ChainOutcome, ChainError>> {
        Box::pin(async move {
            let role = role_label(message.role());
            let mut message = message;
            loop {
                match self.next_step(message) {
                    Step::Run {
                        index,
                        interceptor,
                        message: mut current,
                    } => {
                        debug!(
                            chain_id = %self.id,
                            interceptor = interceptor.id(),
                            phase = interceptor.phase(),
                            "Invoking handle_message"
                        );
                        let started = Instant::now();
                        let result = match AssertUnwindSafe(interceptor.handle_message(&mut current))
                            .catch_unwind()
                            .await
                        {
                            Ok(result) => result,
                            Err(panic) => Err(Fault::server(format!(
                                "interceptor {} panicked: {}",
                                interceptor.id(),
                                panic_reason(panic.as_ref())
                            ))),
                        };
                        telemetry::record_interceptor_duration(
                            interceptor.id(),
                            interceptor.phase(),
                            started.elapsed(),
                        );
                        if let Err(fault) = result {
                            return self.fail(current, index, fault, role).await;
                        }
                        message = current;
                    }
                    Step::Parked => {
                        debug!(chain_id = %self.id, "Chain paused");
                        telemetry::record_chain_paused(role);
                        return Ok(ChainOutcome::Paused);
                    }
                    Step::Complete(done) => {
                        debug!(chain_id = %self.id, message_id = %done.id(), "Chain complete");
                        telemetry::record_chain_completed(role);
                        return Ok(ChainOutcome::Complete(done));
                    }
                    Step::Aborted(done) => {
                        debug!(chain_id = %self.id, message_id = %done.id(), "Chain aborted");
                        telemetry::record_chain_aborted(role, "abort");
                        return Ok(ChainOutcome::Aborted {
                            message: done,
                            fault_message: None,
                        });
                    }
                }
            }
        })
    }

    fn next_step(&self, message: Message) -> Step {
        let mut inner = self.inner.lock();

        if inner.abort_requested {
            inner.abort_requested = false;
            inner.pause = None;
            inner.current = None;
            inner.state = ChainState::Aborted;
            return Step::Aborted(message);
        }

        if let Some(kind) = inner.pause.take() {
            if kind == PauseKind::Suspend {
                if let Some(current) = inner.current {
                    inner.next = current;
                }
            }
            if inner.resume_pending {
                inner.resume_pending = false;
                debug!(chain_id = %self.id, "Resume arrived before pause took effect, continuing");
            } else {
                inner.current = None;
                inner.state = ChainState::Paused;
                inner.parked = Some(message);
                return Step::Parked;
            }
        }

        if inner.next >= inner.entries.len() {
            inner.current = None;
            inner.state = ChainState::Complete;
            return Step::Complete(message);
        }

        let index = inner.next;
        inner.next += 1;
        inner.current = Some(index);
        Step::Run {
            index,
            interceptor: Arc::clone(&inner.entries[index]),
            message,
        }
    }

    async fn fail(
        &self,
        mut message: Message,
        index: usize,
        fault: Fault,
        role: &'static str,
    ) -> Result<ChainOutcome, ChainError> {
        let executed = {
            let mut inner = self.inner.lock();
            inner.state = ChainState::Aborted;
            inner.current = None;
            inner.pause = None;
            inner.resume_pending = false;
            inner.abort_requested = false;
            inner.faulted_at = Some(inner.entries[index].id().to_string());
            inner.entries[inner.first..=index].to_vec()
        };

        if message.fault_mode().is_none() {
            message.set_fault_mode(FaultMode::default());
        }
        message.set_exception(fault.clone());

        if let Some(interceptor) = executed.last() {
            let description = format!(
                "Interceptor {} in phase {} has thrown a fault, unwinding now",
                interceptor.id(),
                interceptor.phase()
            );
            report(&fault, &description, &message);
        }

        unwind(&mut message, &executed);
        telemetry::record_chain_aborted(role, &fault.code().to_string());

        if message.is_one_way() {
            return Ok(ChainOutcome::Aborted {
                message,
                fault_message: None,
            });
        }

        let observer = self.fault_observer.read().clone();
        let fault_message = match observer {
            Some(observer) => observer.on_fault(&mut message).await?,
            None => None,
        };

        Ok(ChainOutcome::Aborted {
            message,
            fault_message,
        })
    }

    fn request_pause(&self, kind: PauseKind, operation: &'static str) -> Result<(), ChainError> {
        let mut inner = self.inner.lock();
        if inner.state != ChainState::Running {
            return Err(ChainError::invalid_state(operation, inner.state));
        }
        inner.pause = Some(kind);
        Ok(())
    }

    fn splice(
        &self,
        additions: Vec<Arc<dyn Interceptor>>,
        force: bool,
    ) -> Result<(), ConfigurationError> {
        let mut inner = self.inner.lock();

        let mut fresh: Vec<Arc<dyn Interceptor>> = Vec::with_capacity(additions.len());
        for interceptor in additions {
            let present = inner.contains(interceptor.id())
                || fresh.iter().any(|added| added.id() == interceptor.id());
            if present && !force {
                debug!(
                    chain_id = %self.id,
                    interceptor = interceptor.id(),
                    "Interceptor already in chain, skipping"
                );
                continue;
            }
            fresh.push(interceptor);
        }
        if fresh.is_empty() {
            return Ok(());
        }

        let start = inner.next;
        let floor = match start.checked_sub(1) {
            Some(last) => self.phases.position(inner.entries[last].phase()).unwrap_or(0),
            None => 0,
        };

        let mut remaining = inner.entries[start..].to_vec();
        remaining.extend(fresh);
        let ordered = linearize_from(&self.phases, remaining, floor)?;

        inner.entries.truncate(start);
        inner.entries.extend(ordered);
        Ok(())
    }
}

impl InterceptorChain for PhaseInterceptorChain {
    fn state(&self) -> ChainState {
        self.inner.lock().state
    }

    fn add_forced(
        &self,
        interceptor: Arc<dyn Interceptor>,
        force: bool,
    ) -> Result<(), ConfigurationError> {
        self.splice(vec![interceptor], force)
    }

    fn pause(&self) -> Result<(), ChainError> {
        self.request_pause(PauseKind::Pause, "pause")
    }

    fn suspend(&self) -> Result<(), ChainError> {
        self.request_pause(PauseKind::Suspend, "suspend")
    }

    fn unpause(&self) {
        let mut inner = self.inner.lock();
        inner.pause = None;
        inner.resume_pending = false;
    }

    fn abort(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            ChainState::Running => inner.abort_requested = true,
            ChainState::Paused | ChainState::Idle => {
                inner.parked = None;
                inner.state = ChainState::Aborted;
            }
            ChainState::Complete | ChainState::Aborted => {}
        }
    }

    fn resume(self: Arc<Self>) -> BoxFuture<'static, Result<ChainOutcome, ChainError>> {
        Box::pin(async move {
            let message = {
                let mut inner = self.inner.lock();
                match inner.state {
                    ChainState::Paused => match inner.parked.take() {
                        Some(message) => {
                            inner.state = ChainState::Running;
                            message
                        }
                        None => return Err(ChainError::NotPaused(ChainState::Paused)),
                    },
                    ChainState::Running if inner.pause.is_some() => {
                        inner.resume_pending = true;
                        return Ok(ChainOutcome::Delegated);
                    }
                    state => return Err(ChainError::NotPaused(state)),
                }
            };
            debug!(chain_id = %self.id, "Resuming chain");
            self.run(message).await
        })
    }

    fn fault_observer(&self) -> Option<Arc<dyn FaultObserver>> {
        self.fault_observer.read().clone()
    }

    fn set_fault_observer(&self, observer: Option<Arc<dyn FaultObserver>>) {
        *self.fault_observer.write() = observer;
    }

    fn iter_ids(&self) -> Vec<String> {
        self.inner
            .lock()
            .entries
            .iter()
            .map(|interceptor| interceptor.id().to_string())
            .collect()
    }
}

impl fmt::Debug for PhaseInterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseInterceptorChain")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("interceptors", &self.iter_ids())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for PhaseInterceptorChain {
    /// Lists interceptors grouped by phase.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Chain {}. Current flow:", self.id)?;
        let inner = self.inner.lock();
        let mut current_phase: Option<&str> = None;
        for interceptor in &inner.entries {
            if current_phase != Some(interceptor.phase()) {
                if current_phase.is_some() {
                    writeln!(f, "]")?;
                }
                write!(f, "  {} [{}", interceptor.phase(), interceptor.id())?;
                current_phase = Some(interceptor.phase());
            } else {
                write!(f, ", {}", interceptor.id())?;
            }
        }
        if current_phase.is_some() {
            writeln!(f, "]")?;
        }
        Ok(())
    }
}

/// Metric label for a message role.
pub(crate) const fn role_label(role: MessageRole) -> &'static str {
    match role {
        MessageRole::Inbound => "inbound",
        MessageRole::Outbound => "outbound",
        MessageRole::InboundFault => "inbound_fault",
        MessageRole::OutboundFault => "outbound_fault",
    }
}

/// Notifies the fault listener, then logs unless it declined.
fn report(fault: &Fault, description: &str, message: &Message) {
    let listener = message.contextual_content::<Arc<dyn FaultListener>>();
    let log = listener.map_or(true, |listener| {
        listener.fault_occurred(fault, description, message)
    });
    if !log {
        return;
    }

    let mode = message.fault_mode().unwrap_or_default();
    if mode.is_checked() {
        info!(fault = %fault, fault_mode = ?mode, message_id = %message.id(), "{}", description);
    } else {
        warn!(fault = %fault, fault_mode = ?mode, message_id = %message.id(), "{}", description);
    }
}

fn panic_reason(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Calls `handle_fault` in reverse execution order. Panics are contained.
fn unwind(message: &mut Message, executed: &[Arc<dyn Interceptor>]) {
    for interceptor in executed.iter().rev() {
        let outcome = catch_unwind(AssertUnwindSafe(|| interceptor.handle_fault(message)));
        if outcome.is_err() {
            warn!(
                interceptor = interceptor.id(),
                "handle_fault panicked during unwind, continuing"
            );
        }
    }
}
