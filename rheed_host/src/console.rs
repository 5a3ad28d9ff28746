//! Operator console.
//!
//! Notices are printed for the operator; the lockout secret is read from
//! the terminal. Both are behind [`Console`] so sessions can be driven by a
//! script.
//!
//! Secret reads block, so they run on the single [`SecretReader`] thread
//! owned by the host. A read started in one session finishes into the next
//! one instead of racing a second reader for the operator's line.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use crate::dispatcher::Notice;

pub trait Console: Send + Sync {
    /// Show one notice.
    fn show(&self, notice: &Notice);

    /// Block until the operator enters the lockout secret.
    fn read_secret(&self, retry: bool) -> io::Result<String>;
}

/// Console on the process's standard streams.
#[derive(Debug, Default)]
pub struct StdConsole;

impl Console for StdConsole {
    fn show(&self, notice: &Notice) {
        println!("{notice}");
    }

    fn read_secret(&self, retry: bool) -> io::Result<String> {
        let mut out = io::stdout().lock();
        if retry {
            write!(out, "Incorrect password. Try again: ")?;
        } else {
            write!(out, "Controls locked. Enter password: ")?;
        }
        out.flush()?;
        drop(out);

        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "console closed",
            ));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

/// Host-lifetime secret reader.
///
/// At most one console read is outstanding. Requests made while one is
/// pending are folded into it; [`SecretReader::next`] hands out its result.
pub struct SecretReader {
    requests: std_mpsc::Sender<bool>,
    secrets: Mutex<mpsc::UnboundedReceiver<io::Result<String>>>,
    outstanding: AtomicBool,
}

impl SecretReader {
    /// Start the reader thread on `console`. It exits once the reader is
    /// dropped and any read in progress returns.
    pub fn spawn(console: Arc<dyn Console>) -> io::Result<Self> {
        let (requests, pending) = std_mpsc::channel::<bool>();
        let (results, secrets) = mpsc::unbounded_channel();
        thread::Builder::new()
            .name("secret-reader".to_string())
            .spawn(move || {
                for retry in pending {
                    if results.send(console.read_secret(retry)).is_err() {
                        return;
                    }
                }
            })?;
        Ok(Self {
            requests,
            secrets: Mutex::new(secrets),
            outstanding: AtomicBool::new(false),
        })
    }

    /// Start a read unless one is already outstanding.
    pub fn request(&self, retry: bool) {
        if self.outstanding.swap(true, Ordering::SeqCst) {
            debug!("Secret read already outstanding");
            return;
        }
        if self.requests.send(retry).is_err() {
            warn!("Secret reader thread has stopped");
            self.outstanding.store(false, Ordering::SeqCst);
        }
    }

    /// Wait for the outstanding read. Cancel safe: an abandoned wait leaves
    /// the result for the next caller.
    pub async fn next(&self) -> Option<io::Result<String>> {
        let mut secrets = self.secrets.lock().await;
        let secret = secrets.recv().await;
        self.outstanding.store(false, Ordering::SeqCst);
        secret
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;
    use std::time::Duration;

    /// Console whose reads return lines pushed by the test.
    struct Typist {
        lines: SyncMutex<std_mpsc::Receiver<String>>,
        prompts: SyncMutex<Vec<bool>>,
    }

    impl Console for Typist {
        fn show(&self, _notice: &Notice) {}

        fn read_secret(&self, retry: bool) -> io::Result<String> {
            self.prompts.lock().push(retry);
            self.lines
                .lock()
                .recv()
                .map_err(|_| io::Error::new(io::ErrorKind::UnexpectedEof, "closed"))
        }
    }

    fn typist() -> (Arc<Typist>, std_mpsc::Sender<String>) {
        let (tx, rx) = std_mpsc::channel();
        let typist = Arc::new(Typist {
            lines: SyncMutex::new(rx),
            prompts: SyncMutex::new(Vec::new()),
        });
        (typist, tx)
    }

    #[tokio::test]
    async fn abandoned_wait_keeps_the_line() {
        let (console, keys) = typist();
        let reader = SecretReader::spawn(console.clone()).unwrap();

        reader.request(false);
        let abandoned = tokio::time::timeout(Duration::from_millis(50), reader.next()).await;
        assert!(abandoned.is_err());

        reader.request(false);
        keys.send("letmein".to_string()).unwrap();
        let secret = tokio::time::timeout(Duration::from_secs(1), reader.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(secret, "letmein");
        assert_eq!(*console.prompts.lock(), vec![false]);
    }

    #[tokio::test]
    async fn each_completed_read_allows_another() {
        let (console, keys) = typist();
        let reader = SecretReader::spawn(console.clone()).unwrap();

        for (retry, line) in [(false, "guess"), (true, "letmein")] {
            reader.request(retry);
            keys.send(line.to_string()).unwrap();
            let got = tokio::time::timeout(Duration::from_secs(1), reader.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            assert_eq!(got, line);
        }
        assert_eq!(*console.prompts.lock(), vec![false, true]);
    }
}
