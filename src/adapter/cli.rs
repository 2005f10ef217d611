//! Terminal adapter.
//!
//! Every input line becomes a `ReceiveMessageEvent`. The next prompt is only
//! printed once the brain ran every handler for that line (the event's
//! completion callback), so answers never interleave with the prompt.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex as StdMutex, PoisonError,
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::{oneshot, watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, warn};

use super::{Adapter, AdapterError, AdapterResult};
use crate::brain::{Brain, Cancellation, Event, InitEvent, ReceiveMessageEvent};

type Input = Box<dyn AsyncBufRead + Send + Unpin>;
type Output = Box<dyn AsyncWrite + Send + Unpin>;

/// Output sink shared by the read loop, the init handler, and `send`.
struct Printer {
    output: Mutex<Output>,
    closed: AtomicBool,
}

impl Printer {
    async fn print(&self, text: &str) -> AdapterResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AdapterError::Closed);
        }
        let mut output = self.output.lock().await;
        output.write_all(text.as_bytes()).await?;
        output.flush().await?;
        Ok(())
    }
}

pub struct CliAdapter {
    prompt: String,
    author: String,
    printer: Arc<Printer>,
    input: StdMutex<Option<Input>>,
    closing: Cancellation,
    input_done: Arc<watch::Sender<bool>>,
    closed: AtomicBool,
    task: StdMutex<Option<JoinHandle<()>>>,
}

impl CliAdapter {
    /// Reads from stdin and writes to stdout.
    pub fn new(prompt: impl Into<String>, author: impl Into<String>) -> Self {
        Self::with_io(prompt, author, tokio::io::stdin(), tokio::io::stdout())
    }

    pub fn with_io<R, W>(
        prompt: impl Into<String>,
        author: impl Into<String>,
        input: R,
        output: W,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (input_done, _) = watch::channel(false);
        Self {
            prompt: prompt.into(),
            author: author.into(),
            printer: Arc::new(Printer {
                output: Mutex::new(Box::new(output)),
                closed: AtomicBool::new(false),
            }),
            input: StdMutex::new(Some(Box::new(BufReader::new(input)))),
            closing: Cancellation::new(),
            input_done: Arc::new(input_done),
            closed: AtomicBool::new(false),
            task: StdMutex::new(None),
        }
    }

    /// Resolves once the input reached its end (or failed).
    pub async fn input_finished(&self) {
        let mut done = self.input_done.subscribe();
        let _ = done.wait_for(|done| *done).await;
    }
}

#[async_trait]
impl Adapter for CliAdapter {
    async fn register_at(&self, brain: &Arc<Brain>) -> AdapterResult<()> {
        let input = self
            .input
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(AdapterError::AlreadyRegistered)?;

        let printer = self.printer.clone();
        let prompt = self.prompt.clone();
        brain.register_async(move |_: InitEvent| {
            let printer = printer.clone();
            let prompt = prompt.clone();
            async move { printer.print(&prompt).await }
        });

        let reader = LineReader {
            brain: brain.clone(),
            printer: self.printer.clone(),
            prompt: self.prompt.clone(),
            author: self.author.clone(),
            closing: self.closing.clone(),
            input_done: self.input_done.clone(),
        };
        let task = tokio::spawn(reader.run(input));
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
        Ok(())
    }

    async fn send(&self, text: &str, _channel: &str) -> AdapterResult<()> {
        self.printer.print(&format!("{text}\n")).await
    }

    async fn close(&self) -> AdapterResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(AdapterError::AlreadyClosed);
        }

        self.closing.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("CLI reader ended abnormally: {}", e);
            }
        }

        let result = self.printer.print("\n").await;
        self.printer.closed.store(true, Ordering::SeqCst);
        result
    }
}

struct LineReader {
    brain: Arc<Brain>,
    printer: Arc<Printer>,
    prompt: String,
    author: String,
    closing: Cancellation,
    input_done: Arc<watch::Sender<bool>>,
}

impl LineReader {
    async fn run(self, input: Input) {
        let mut lines = input.lines();
        loop {
            let line = tokio::select! {
                _ = self.closing.cancelled() => break,
                line = lines.next_line() => line,
            };
            let text = match line {
                Ok(Some(text)) => text,
                Ok(None) => {
                    debug!("End of CLI input");
                    break;
                }
                Err(e) => {
                    warn!("Failed to read CLI input: {}", e);
                    break;
                }
            };

            let (handled_tx, handled) = oneshot::channel();
            let event = Event::new(ReceiveMessageEvent::new(
                text.trim_end_matches('\r'),
                self.author.clone(),
            ))
            .on_complete(move |_| {
                let _ = handled_tx.send(());
            });
            if let Err(e) = self.brain.emit_event(event) {
                debug!("Stop reading CLI input: {}", e);
                break;
            }

            tokio::select! {
                _ = self.closing.cancelled() => break,
                _ = handled => {}
            }
            if self.printer.print(&self.prompt).await.is_err() {
                break;
            }
        }
        self.input_done.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::HandlerContext;
    use std::{
        io,
        pin::Pin,
        task::{Context, Poll},
        time::Duration,
    };

    /// Writer whose contents the test can read back.
    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<StdMutex<Vec<u8>>>);

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl AsyncWrite for SharedBuffer {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_lines_become_events_and_prompts_follow_handling() {
        let brain = Arc::new(Brain::new());
        let output = SharedBuffer::default();
        let adapter = Arc::new(CliAdapter::with_io(
            "bot> ",
            "tester",
            io::Cursor::new(b"hello\r\nworld\n".to_vec()),
            output.clone(),
        ));

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let s = seen.clone();
        let responder = adapter.clone();
        brain.register_async(move |_: HandlerContext, event: ReceiveMessageEvent| {
            s.lock().unwrap().push((event.text.clone(), event.author_id.clone()));
            let responder = responder.clone();
            async move { responder.send(&format!("echo {}", event.text), "").await }
        });

        adapter.register_at(&brain).await.unwrap();
        let run = {
            let brain = brain.clone();
            tokio::spawn(async move { brain.handle_events().await })
        };

        tokio::time::timeout(Duration::from_secs(5), adapter.input_finished())
            .await
            .unwrap();
        brain.shutdown(Cancellation::new()).await.unwrap();
        run.await.unwrap().unwrap();
        adapter.close().await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("hello".to_string(), "tester".to_string()),
                ("world".to_string(), "tester".to_string())
            ]
        );
        assert_eq!(
            output.contents(),
            "bot> echo hello\nbot> echo world\nbot> \n"
        );
    }

    #[tokio::test]
    async fn test_close_twice_fails_and_send_after_close_fails() {
        let adapter = CliAdapter::with_io(
            "> ",
            "me",
            io::Cursor::new(Vec::new()),
            SharedBuffer::default(),
        );
        adapter.close().await.unwrap();
        assert!(matches!(adapter.close().await, Err(AdapterError::AlreadyClosed)));
        assert!(matches!(adapter.send("hi", "").await, Err(AdapterError::Closed)));
    }

    #[tokio::test]
    async fn test_register_twice_fails() {
        let brain = Arc::new(Brain::new());
        let adapter = CliAdapter::with_io(
            "> ",
            "me",
            io::Cursor::new(Vec::new()),
            SharedBuffer::default(),
        );
        adapter.register_at(&brain).await.unwrap();
        assert!(matches!(
            adapter.register_at(&brain).await,
            Err(AdapterError::AlreadyRegistered)
        ));
        adapter.close().await.unwrap();
    }
}
