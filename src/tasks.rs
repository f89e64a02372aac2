//! Completion task store
//!
//! Owns the set of in-flight streaming generations. Each task runs on its own
//! tokio task, publishes its cumulative text through a [`ReactiveCell`], and is
//! retired from the active list when it completes, fails, is aborted, or
//! times out.

use crate::llm::{self, CompletionRequest, CompletionTransport, LlmError};
use crate::reactive::{ReactiveCell, Subscription};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How a task that did not fail came to an end.
///
/// Aborted and timed-out tasks keep the text received before they stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Completed,
    Aborted,
    TimedOut,
}

/// Handle to one in-flight generation
#[derive(Clone)]
pub struct CompletionTask {
    id: String,
    serial: u64,
    result: ReactiveCell<String>,
    cancel: CancellationToken,
}

impl CompletionTask {
    /// Id of the node this task writes into
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Cumulative text so far
    pub fn result(&self) -> &ReactiveCell<String> {
        &self.result
    }

    pub fn text(&self) -> String {
        self.result.get()
    }

    /// Request cancellation. Safe to call repeatedly and after the task ended.
    pub fn abort(&self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!(task_id = %self.id, "Aborting completion task");
            self.cancel.cancel();
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for CompletionTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionTask")
            .field("id", &self.id)
            .field("serial", &self.serial)
            .field("aborted", &self.is_aborted())
            .finish_non_exhaustive()
    }
}

type TextCallback = Box<dyn Fn(&str) + Send + Sync>;
type DoneCallback = Box<dyn FnOnce(String, FinishReason) + Send>;
type ErrorCallback = Box<dyn FnOnce(LlmError) + Send>;

/// Callbacks for one task; all optional
#[derive(Default)]
pub struct TaskCallbacks {
    on_text: Option<TextCallback>,
    on_done: Option<DoneCallback>,
    on_error: Option<ErrorCallback>,
}

impl TaskCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the cumulative text after every fragment
    #[must_use]
    pub fn on_text(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_text = Some(Box::new(f));
        self
    }

    /// Called once with the final text when the task ends without error
    #[must_use]
    pub fn on_done(mut self, f: impl FnOnce(String, FinishReason) + Send + 'static) -> Self {
        self.on_done = Some(Box::new(f));
        self
    }

    /// Called once when the request fails
    #[must_use]
    pub fn on_error(mut self, f: impl FnOnce(LlmError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }
}

/// Registry of active completion tasks
pub struct TaskStore {
    tasks: ReactiveCell<Vec<CompletionTask>>,
    transport: Arc<dyn CompletionTransport>,
    timeout: Option<Duration>,
    next_serial: AtomicU64,
}

impl TaskStore {
    pub fn new(transport: Arc<dyn CompletionTransport>) -> Self {
        Self {
            tasks: ReactiveCell::new(Vec::new()),
            transport,
            timeout: None,
            next_serial: AtomicU64::new(0),
        }
    }

    /// Abort tasks still running after `timeout`. Unbounded by default.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Start a streaming generation for node `id`.
    ///
    /// Never fails synchronously: transport and service failures arrive through
    /// `on_error`. Must be called within a tokio runtime.
    pub fn start(
        &self,
        id: impl Into<String>,
        api_key: Option<String>,
        request: CompletionRequest,
        callbacks: TaskCallbacks,
    ) -> CompletionTask {
        let task = CompletionTask {
            id: id.into(),
            serial: self.next_serial.fetch_add(1, Ordering::Relaxed),
            result: ReactiveCell::new(String::new()),
            cancel: CancellationToken::new(),
        };

        tracing::info!(
            task_id = %task.id,
            model = %request.model,
            messages = request.messages.len(),
            "Starting completion task"
        );

        // Registered before spawning so retirement can never precede it
        let registered = task.clone();
        self.tasks.set(move |prev| {
            let mut next = prev.clone();
            next.push(registered);
            next
        });

        let tasks = self.tasks.clone();
        let transport = Arc::clone(&self.transport);
        let timeout = self.timeout;
        let handle = task.clone();

        tokio::spawn(async move {
            run_task(handle, tasks, transport, api_key, request, callbacks, timeout).await;
        });

        task
    }

    /// Snapshot of active tasks, oldest first
    pub fn get(&self) -> Vec<CompletionTask> {
        self.tasks.get()
    }

    /// Listen for changes to the active task list
    pub fn subscribe(
        &self,
        listener: impl Fn(&Vec<CompletionTask>) + Send + Sync + 'static,
    ) -> Subscription {
        self.tasks.subscribe(listener)
    }

    /// Active task writing into node `id`
    pub fn find(&self, id: &str) -> Option<CompletionTask> {
        self.tasks.get().into_iter().find(|t| t.id == id)
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.tasks.get().iter().any(|t| t.id == id)
    }

    /// Abort every active task for node `id`, returning whether any existed
    pub fn abort(&self, id: &str) -> bool {
        let matching: Vec<CompletionTask> =
            self.tasks.get().into_iter().filter(|t| t.id == id).collect();
        for task in &matching {
            task.abort();
        }
        !matching.is_empty()
    }

    pub fn abort_all(&self) {
        for task in self.tasks.get() {
            task.abort();
        }
    }
}

async fn run_task(
    task: CompletionTask,
    tasks: ReactiveCell<Vec<CompletionTask>>,
    transport: Arc<dyn CompletionTransport>,
    api_key: Option<String>,
    request: CompletionRequest,
    callbacks: TaskCallbacks,
    timeout: Option<Duration>,
) {
    let TaskCallbacks {
        on_text,
        on_done,
        on_error,
    } = callbacks;

    let result = task.result.clone();
    let cancel = task.cancel.clone();
    let started = std::time::Instant::now();

    let stream = llm::stream_completion(transport.as_ref(), api_key.as_deref(), &request, |text| {
        // Nothing is published once abort was requested
        if cancel.is_cancelled() {
            return;
        }
        let owned = text.to_string();
        result.set(move |_| owned);
        if let Some(on_text) = &on_text {
            on_text(text);
        }
    });

    let deadline = async {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };

    let outcome = tokio::select! {
        biased;
        () = task.cancel.cancelled() => Ok(FinishReason::Aborted),
        () = deadline => Ok(FinishReason::TimedOut),
        streamed = stream => streamed.map(|_| FinishReason::Completed),
    };

    // Aborted or timed out: stop any later publish from a lingering handle
    if matches!(outcome, Ok(FinishReason::TimedOut)) {
        task.cancel.cancel();
    }

    let serial = task.serial;
    tasks.set(move |prev| prev.iter().filter(|t| t.serial != serial).cloned().collect());

    let elapsed_ms = started.elapsed().as_millis();
    match outcome {
        Ok(reason) => {
            let text = task.result.get();
            tracing::info!(
                task_id = %task.id,
                reason = ?reason,
                chars = text.chars().count(),
                duration_ms = %elapsed_ms,
                "Completion task finished"
            );
            if let Some(on_done) = on_done {
                on_done(text, reason);
            }
        }
        Err(e) => {
            tracing::error!(
                task_id = %task.id,
                duration_ms = %elapsed_ms,
                error = %e.message,
                transient = e.kind.is_transient(),
                "Completion task failed"
            );
            if let Some(on_error) = on_error {
                on_error(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::{data_line, eventually, MockTransport};
    use crate::llm::{ChatMessage, LlmErrorKind};
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    fn request() -> CompletionRequest {
        CompletionRequest::streaming("gpt-4o", vec![ChatMessage::user("hello?")])
    }

    fn store(transport: &Arc<MockTransport>) -> TaskStore {
        TaskStore::new(transport.clone())
    }

    #[tokio::test]
    async fn test_streams_cumulative_text_then_retires() {
        let transport = Arc::new(MockTransport::new());
        transport.queue_chunks(
            200,
            vec![data_line("Hel"), data_line("lo"), data_line(" world")],
        );
        let tasks = store(&transport);

        let updates = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&updates);
        let (done_tx, done_rx) = oneshot::channel();

        let task = tasks.start(
            "#a",
            Some("sk".into()),
            request(),
            TaskCallbacks::new()
                .on_text(move |t| sink.lock().unwrap().push(t.to_string()))
                .on_done(move |text, reason| {
                    let _ = done_tx.send((text, reason));
                }),
        );
        assert_eq!(task.id(), "#a");

        let (text, reason) = done_rx.await.unwrap();
        assert_eq!(text, "Hello world");
        assert_eq!(reason, FinishReason::Completed);
        assert_eq!(*updates.lock().unwrap(), vec!["Hel", "Hello", "Hello world"]);
        assert_eq!(task.text(), "Hello world");
        assert!(tasks.get().is_empty());
    }

    #[tokio::test]
    async fn test_task_listed_while_streaming() {
        let transport = Arc::new(MockTransport::new());
        let feed = transport.queue_stream(200);
        let tasks = store(&transport);

        let lists = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lists);
        let sub = tasks.subscribe(move |list| sink.lock().unwrap().push(list.len()));

        let task = tasks.start("#b", None, request(), TaskCallbacks::new());
        assert!(tasks.is_active("#b"));
        assert_eq!(tasks.find("#b").unwrap().id(), "#b");

        feed.send(Ok(data_line("x"))).unwrap();
        assert!(eventually(|| task.text() == "x").await);

        drop(feed);
        assert!(eventually(|| tasks.get().is_empty()).await);
        assert_eq!(*lists.lock().unwrap(), vec![1, 0]);
        sub.unsubscribe();
    }

    #[tokio::test]
    async fn test_abort_resolves_with_partial_text() {
        let transport = Arc::new(MockTransport::new());
        let feed = transport.queue_stream(200);
        let tasks = store(&transport);

        let (done_tx, done_rx) = oneshot::channel();
        let errored = Arc::new(Mutex::new(false));
        let error_flag = Arc::clone(&errored);

        let task = tasks.start(
            "#c",
            None,
            request(),
            TaskCallbacks::new()
                .on_done(move |text, reason| {
                    let _ = done_tx.send((text, reason));
                })
                .on_error(move |_| *error_flag.lock().unwrap() = true),
        );

        feed.send(Ok(data_line("Once upon"))).unwrap();
        assert!(eventually(|| task.text() == "Once upon").await);

        assert!(tasks.abort("#c"));
        task.abort();

        let (text, reason) = done_rx.await.unwrap();
        assert_eq!(text, "Once upon");
        assert_eq!(reason, FinishReason::Aborted);
        assert!(!*errored.lock().unwrap());
        assert!(tasks.get().is_empty());

        // Late chunks go nowhere and repeated aborts are no-ops
        let _ = feed.send(Ok(data_line(" a time")));
        task.abort();
        assert_eq!(task.text(), "Once upon");
        assert!(!tasks.abort("#c"));
    }

    #[tokio::test]
    async fn test_service_error_reports_and_retires() {
        let transport = Arc::new(MockTransport::new());
        transport.queue_chunks(401, vec![br#"{"error":{"code":"invalid_api_key"}}"#.to_vec()]);
        let tasks = store(&transport);

        let (err_tx, err_rx) = oneshot::channel();
        tasks.start(
            "#d",
            Some("bad".into()),
            request(),
            TaskCallbacks::new().on_error(move |e| {
                let _ = err_tx.send(e);
            }),
        );

        let err = err_rx.await.unwrap();
        assert!(err.to_string().contains("invalid_api_key"));
        assert_eq!(err.kind, LlmErrorKind::Auth);
        assert!(eventually(|| tasks.get().is_empty()).await);
    }

    #[tokio::test]
    async fn test_transport_error_reports() {
        let transport = Arc::new(MockTransport::new());
        transport.queue_error(LlmError::network("Connection failed"));
        let tasks = store(&transport);

        let (err_tx, err_rx) = oneshot::channel();
        tasks.start(
            "#e",
            None,
            request(),
            TaskCallbacks::new().on_error(move |e| {
                let _ = err_tx.send(e);
            }),
        );

        assert_eq!(err_rx.await.unwrap().kind, LlmErrorKind::Network);
        assert!(tasks.get().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_resolves_like_abort() {
        let transport = Arc::new(MockTransport::new());
        let feed = transport.queue_stream(200);
        let tasks = store(&transport).with_timeout(Some(Duration::from_millis(100)));

        let (done_tx, done_rx) = oneshot::channel();
        let task = tasks.start(
            "#f",
            None,
            request(),
            TaskCallbacks::new().on_done(move |text, reason| {
                let _ = done_tx.send((text, reason));
            }),
        );
        feed.send(Ok(data_line("slow"))).unwrap();

        let (text, reason) = done_rx.await.unwrap();
        assert_eq!(reason, FinishReason::TimedOut);
        assert_eq!(text, "slow");
        assert!(task.is_aborted());
        assert!(tasks.get().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_tasks_are_independent() {
        let transport = Arc::new(MockTransport::new());
        let first = transport.queue_stream(200);
        let second = transport.queue_stream(200);
        let tasks = store(&transport);

        let a = tasks.start("#g1", None, request(), TaskCallbacks::new());
        let b = tasks.start("#g2", None, request(), TaskCallbacks::new());
        assert_eq!(tasks.get().len(), 2);

        first.send(Ok(data_line("one"))).unwrap();
        second.send(Ok(data_line("two"))).unwrap();
        assert!(eventually(|| {
            let mut texts = vec![a.text(), b.text()];
            texts.sort();
            texts == ["one", "two"]
        })
        .await);

        a.abort();
        assert!(eventually(|| tasks.get().len() == 1).await);
        assert_eq!(tasks.get()[0].id(), "#g2");

        drop(first);
        drop(second);
        assert!(eventually(|| tasks.get().is_empty()).await);
    }
}
