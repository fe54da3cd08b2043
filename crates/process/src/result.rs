//! Components that produce a value in addition to succeeding.

use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use common::{IdSource, ProcessId};

use crate::base::{ComponentCore, lock};
use crate::component::{ProcessComponent, ProcessOutcome};
use crate::decorator::{AsyncComponent, ProcessDecorator};
use crate::error::Result;
use crate::handle::AsyncHandle;
use crate::lifecycle::{self, Compensable, Executable};
use crate::listener::{ListenerSet, ProcessComponentListener, ProcessResultListener};
use crate::reason::RollbackReason;
use crate::state::ProcessState;

/// A component that yields a value of type `T` when it succeeds.
///
/// Result listeners are notified before the component's `on_succeeded`.
/// Attach them before `start`; a listener attached after the result was
/// produced is not called back.
pub trait ResultComponent<T>: ProcessComponent
where
    T: Clone + Send + Sync + 'static,
{
    fn attach_result_listener(&self, listener: Arc<dyn ProcessResultListener<T>>);

    fn detach_result_listener(&self, listener: &Arc<dyn ProcessResultListener<T>>) -> bool;

    /// The produced value. Always `None` before success and after a rollback.
    fn result(&self) -> Option<T>;
}

/// The work of a [`ResultStep`].
#[async_trait]
pub trait ResultStepBody: Send + Sync + 'static {
    type Output: Clone + Send + Sync + 'static;

    async fn execute(&self) -> std::result::Result<Self::Output, RollbackReason>;

    async fn rollback(&self, _reason: &RollbackReason) -> std::result::Result<(), RollbackReason> {
        Ok(())
    }
}

/// A leaf step that produces a value.
pub struct ResultStep<B: ResultStepBody> {
    core: ComponentCore,
    body: B,
    result: Mutex<Option<B::Output>>,
    result_listeners: ListenerSet<dyn ProcessResultListener<B::Output>>,
}

impl<B: ResultStepBody> ResultStep<B> {
    pub fn new(name: impl Into<String>, body: B) -> Self {
        Self::with_id(ProcessId::new(), name, body)
    }

    pub fn with_id(id: ProcessId, name: impl Into<String>, body: B) -> Self {
        Self {
            core: ComponentCore::new(id, name, "result_step"),
            body,
            result: Mutex::new(None),
            result_listeners: ListenerSet::new(),
        }
    }

    pub fn from_source(ids: &dyn IdSource, name: impl Into<String>, body: B) -> Self {
        Self::with_id(ids.next_id(), name, body)
    }

    pub fn body(&self) -> &B {
        &self.body
    }
}

#[async_trait]
impl<B: ResultStepBody> Compensable for ResultStep<B> {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    async fn rollback(&self, reason: &RollbackReason) {
        lock(&self.result).take();
        if let Err(error) = self.body.rollback(reason).await {
            self.core.record_rollback_error(&error);
        }
    }
}

#[async_trait]
impl<B: ResultStepBody> Executable for ResultStep<B> {
    async fn execute(&self) -> std::result::Result<(), RollbackReason> {
        let _forward = self.core.enter_forward();
        let value = self.body.execute().await?;
        if !self.core.status().is_executing() {
            return Ok(());
        }

        *lock(&self.result) = Some(value.clone());
        for listener in self.result_listeners.snapshot() {
            listener.on_result_ready(&value);
        }
        Ok(())
    }
}

#[async_trait]
impl<B: ResultStepBody> ProcessComponent for ResultStep<B> {
    fn id(&self) -> ProcessId {
        self.core.id()
    }

    fn name(&self) -> &str {
        self.core.name()
    }

    fn state(&self) -> ProcessState {
        self.core.state()
    }

    fn is_rolling_back(&self) -> bool {
        self.core.status().is_rolling_back()
    }

    fn progress(&self) -> f64 {
        self.core.progress()
    }

    fn attach_listener(&self, listener: Arc<dyn ProcessComponentListener>) {
        self.core.attach_listener(listener);
    }

    fn detach_listener(&self, listener: &Arc<dyn ProcessComponentListener>) -> bool {
        self.core.detach_listener(listener)
    }

    async fn start(&self) -> Result<()> {
        lifecycle::start(self).await
    }

    fn pause(&self) -> Result<()> {
        self.core.pause()
    }

    fn resume(&self) -> Result<()> {
        self.core.resume()
    }

    async fn cancel(&self, reason: RollbackReason) -> Result<()> {
        lifecycle::cancel(self, reason).await
    }

    async fn wait(&self) -> ProcessOutcome {
        self.core.wait_terminal().await
    }

    fn parent(&self) -> Option<Arc<dyn ProcessComponent>> {
        self.core.parent()
    }

    fn set_parent(&self, parent: Weak<dyn ProcessComponent>) -> Result<()> {
        self.core.set_parent(parent)
    }

    fn clear_parent(&self) {
        self.core.clear_parent();
    }
}

impl<B: ResultStepBody> ResultComponent<B::Output> for ResultStep<B> {
    fn attach_result_listener(&self, listener: Arc<dyn ProcessResultListener<B::Output>>) {
        self.result_listeners.attach(listener);
    }

    fn detach_result_listener(
        &self,
        listener: &Arc<dyn ProcessResultListener<B::Output>>,
    ) -> bool {
        self.result_listeners.detach(listener)
    }

    fn result(&self) -> Option<B::Output> {
        match self.core.state() {
            ProcessState::Failed | ProcessState::RollingBack => None,
            _ if self.core.status().is_rolling_back() => None,
            _ => lock(&self.result).clone(),
        }
    }
}

/// Forks a result-producing component, like [`AsyncComponent`], and
/// forwards result listeners to it.
pub struct AsyncResultComponent<T> {
    inner: AsyncComponent,
    results: Arc<dyn ResultComponent<T>>,
}

impl<T> AsyncResultComponent<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new<C>(decorated: Arc<C>) -> Self
    where
        C: ResultComponent<T>,
    {
        Self::with_id(ProcessId::new(), decorated)
    }

    pub fn with_id<C>(id: ProcessId, decorated: Arc<C>) -> Self
    where
        C: ResultComponent<T>,
    {
        let results: Arc<dyn ResultComponent<T>> = decorated.clone();
        let component: Arc<dyn ProcessComponent> = decorated;
        Self {
            inner: AsyncComponent::with_id(id, component),
            results,
        }
    }
}

#[async_trait]
impl<T> ProcessComponent for AsyncResultComponent<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn id(&self) -> ProcessId {
        self.inner.id()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn state(&self) -> ProcessState {
        self.inner.state()
    }

    fn is_rolling_back(&self) -> bool {
        self.inner.is_rolling_back()
    }

    fn progress(&self) -> f64 {
        self.inner.progress()
    }

    fn attach_listener(&self, listener: Arc<dyn ProcessComponentListener>) {
        self.inner.attach_listener(listener);
    }

    fn detach_listener(&self, listener: &Arc<dyn ProcessComponentListener>) -> bool {
        self.inner.detach_listener(listener)
    }

    async fn start(&self) -> Result<()> {
        self.inner.start().await
    }

    fn pause(&self) -> Result<()> {
        self.inner.pause()
    }

    fn resume(&self) -> Result<()> {
        self.inner.resume()
    }

    async fn cancel(&self, reason: RollbackReason) -> Result<()> {
        self.inner.cancel(reason).await
    }

    async fn wait(&self) -> ProcessOutcome {
        self.inner.wait().await
    }

    fn async_handle(&self) -> Option<AsyncHandle> {
        self.inner.async_handle()
    }

    fn parent(&self) -> Option<Arc<dyn ProcessComponent>> {
        self.inner.parent()
    }

    fn set_parent(&self, parent: Weak<dyn ProcessComponent>) -> Result<()> {
        self.inner.set_parent(parent)
    }

    fn clear_parent(&self) {
        self.inner.clear_parent();
    }
}

impl<T> ProcessDecorator for AsyncResultComponent<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn decorated(&self) -> &Arc<dyn ProcessComponent> {
        self.inner.decorated()
    }
}

impl<T> ResultComponent<T> for AsyncResultComponent<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn attach_result_listener(&self, listener: Arc<dyn ProcessResultListener<T>>) {
        self.results.attach_result_listener(listener);
    }

    fn detach_result_listener(&self, listener: &Arc<dyn ProcessResultListener<T>>) -> bool {
        self.results.detach_result_listener(listener)
    }

    fn result(&self) -> Option<T> {
        self.results.result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Answer {
        fail: bool,
    }

    #[async_trait]
    impl ResultStepBody for Answer {
        type Output = u32;

        async fn execute(&self) -> std::result::Result<u32, RollbackReason> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if self.fail {
                return Err(RollbackReason::from_hint("no answer"));
            }
            Ok(42)
        }
    }

    /// Records notifications in arrival order.
    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl ProcessResultListener<u32> for Recorder {
        fn on_result_ready(&self, result: &u32) {
            self.events.lock().unwrap().push(format!("result:{result}"));
        }
    }

    impl ProcessComponentListener for Recorder {
        fn on_succeeded(&self) {
            self.events.lock().unwrap().push("succeeded".to_string());
        }

        fn on_failed(&self, reason: &RollbackReason) {
            self.events.lock().unwrap().push(format!("failed:{}", reason.hint()));
        }
    }

    #[tokio::test]
    async fn test_result_delivered_before_success() {
        let step = ResultStep::new("answer", Answer { fail: false });
        let recorder = Arc::new(Recorder::default());
        step.attach_result_listener(recorder.clone());
        step.attach_listener(recorder.clone());

        step.start().await.unwrap();

        assert_eq!(step.result(), Some(42));
        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec!["result:42".to_string(), "succeeded".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failure_produces_no_result() {
        let step = ResultStep::new("answer", Answer { fail: true });
        let recorder = Arc::new(Recorder::default());
        step.attach_result_listener(recorder.clone());
        step.attach_listener(recorder.clone());

        step.start().await.unwrap();

        assert_eq!(step.result(), None);
        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec!["failed:no answer".to_string()]
        );
    }

    #[tokio::test]
    async fn test_result_hidden_after_compensation() {
        let step = ResultStep::new("answer", Answer { fail: false });
        step.start().await.unwrap();
        assert_eq!(step.result(), Some(42));

        step.cancel(RollbackReason::from_hint("undo")).await.unwrap();
        assert_eq!(step.result(), None);
    }

    #[tokio::test]
    async fn test_async_result_forwards_listeners() {
        let step = Arc::new(ResultStep::new("answer", Answer { fail: false }));
        let forked = AsyncResultComponent::new(step.clone());
        let recorder = Arc::new(Recorder::default());
        forked.attach_result_listener(recorder.clone());

        forked.start().await.unwrap();
        assert!(forked.result().is_none());
        forked.wait().await.unwrap();

        assert_eq!(forked.result(), Some(42));
        assert_eq!(forked.decorated().id(), step.id());
        assert_eq!(*recorder.events.lock().unwrap(), vec!["result:42".to_string()]);
    }
}
