//! Host session supervisor.
//!
//! One session spans one handshake and owns a single instance of each task
//! for its lifetime:
//!
//! - link reader (blocking thread feeding a channel)
//! - dispatcher (the session task itself)
//! - liveness monitor
//! - heartbeat sender
//! - display/classify loop
//! - secret prompt worker (feeds from the host's [`SecretReader`])
//!
//! The session ends when the link flatlines or `running` is cleared. All
//! tasks are cancelled and the reader thread is joined before returning,
//! so the port can be reopened straight away.

use parking_lot::Mutex;
use rheed_common::handshake;
use rheed_common::link::{Link, LinkError, LinkReceiver, LinkSender};
use rheed_common::liveness::{LinkHealth, Liveness, LivenessWindow};
use rheed_common::protocol::Message;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{self, JoinSet};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::classifier::Classifier;
use crate::config::HostConfig;
use crate::console::{Console, SecretReader};
use crate::dispatcher::{ClassifyGate, HostState, Notice, Reaction};
use crate::error::HostError;
use crate::heartbeat::HeartbeatGate;
use crate::images::ImageWatcher;
use crate::viewer::Viewer;

const LINE_QUEUE: usize = 64;
const PROMPT_QUEUE: usize = 4;

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSessionEnd {
    /// The controller went silent or the link failed; reconnect.
    Flatline,
    /// `running` was cleared.
    Shutdown,
}

/// Host process: configuration plus the operator-side collaborators.
pub struct Host {
    config: HostConfig,
    viewer: Arc<dyn Viewer>,
    classifier: Arc<dyn Classifier>,
    console: Arc<dyn Console>,
    secrets: Arc<SecretReader>,
    running: Arc<AtomicBool>,
}

impl Host {
    /// Build the host and start its console secret reader.
    pub fn new(
        config: HostConfig,
        viewer: Arc<dyn Viewer>,
        classifier: Arc<dyn Classifier>,
        console: Arc<dyn Console>,
    ) -> Result<Self, HostError> {
        let secrets = Arc::new(SecretReader::spawn(Arc::clone(&console))?);
        Ok(Self {
            config,
            viewer,
            classifier,
            console,
            secrets,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Clearing this flag ends the current session and the handshake wait.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Handshake, then serve the controller until flatline or shutdown.
    ///
    /// On shutdown a final `STOP` is sent while the link is still alive.
    pub async fn run_session(&self, link: Link, port: &str) -> Result<HostSessionEnd, HostError> {
        let (sender, receiver) = link.into_parts();
        let poll = self.config.link.poll;

        let receiver = match self.handshake(&sender, receiver).await? {
            Ok(receiver) => receiver,
            Err(LinkError::HandshakeAborted) => return Ok(HostSessionEnd::Shutdown),
            Err(e) => return Err(e.into()),
        };

        let health = LinkHealth::new();
        health.mark_live();
        let ctx = SessionCtx {
            sender,
            health: health.clone(),
            heartbeat: HeartbeatGate::new(),
            state: Arc::new(Mutex::new(HostState::new())),
            running: Arc::clone(&self.running),
            console: Arc::clone(&self.console),
        };
        ctx.console.show(&Notice::Connected {
            port: port.to_string(),
        });

        let (line_tx, mut lines) = mpsc::channel(LINE_QUEUE);
        let reader = spawn_reader(receiver, line_tx, health.clone(), self.running_flag(), poll)?;

        let session = &self.config.session;
        let (prompt_tx, prompt_rx) = mpsc::channel(PROMPT_QUEUE);
        let mut tasks = JoinSet::new();
        tasks.spawn(liveness_task(
            ctx.clone(),
            session.liveness_tick,
            session.liveness_window_ticks,
        ));
        tasks.spawn(heartbeat_task(ctx.clone(), session.heartbeat));
        tasks.spawn(display_task(
            ctx.clone(),
            DisplaySettings {
                image_dir: session.image_dir.clone(),
                poll: session.image_poll,
                ready_delay: session.ready_delay,
            },
            Arc::clone(&self.viewer),
            Arc::clone(&self.classifier),
        ));
        tasks.spawn(prompt_task(
            ctx.clone(),
            prompt_rx,
            Arc::clone(&self.secrets),
            session.secret_delay,
        ));

        dispatch_loop(&ctx, &mut lines, &prompt_tx, poll).await;

        let end = if self.running.load(Ordering::SeqCst) {
            HostSessionEnd::Flatline
        } else {
            if !health.is_flatline() {
                info!("Shutting down, sending STOP to controller");
                ctx.send(&Message::Stop);
            }
            HostSessionEnd::Shutdown
        };

        health.set_flatline();
        tasks.abort_all();
        let mut failure = None;
        while let Some(res) = tasks.join_next().await {
            match res {
                Err(e) if e.is_panic() => failure = Some(HostError::task("session", e)),
                _ => {}
            }
        }

        drop(lines);
        task::spawn_blocking(move || reader.join())
            .await
            .map_err(|e| HostError::task("link-reader", e))?
            .map_err(|_| HostError::Task {
                task: "link-reader",
                detail: "panicked".to_string(),
            })?;

        if let Some(e) = failure {
            return Err(e);
        }
        if end == HostSessionEnd::Flatline {
            ctx.console.show(&Notice::Disconnected);
        }
        Ok(end)
    }

    /// Run the blocking handshake off the runtime, handing the receiver back.
    async fn handshake(
        &self,
        sender: &LinkSender,
        mut receiver: LinkReceiver,
    ) -> Result<Result<LinkReceiver, LinkError>, HostError> {
        let sender = sender.clone();
        let poll = self.config.link.poll;
        let running = self.running_flag();
        task::spawn_blocking(move || {
            handshake::initiate(&sender, &mut receiver, poll, &running).map(|()| receiver)
        })
        .await
        .map_err(|e| HostError::task("handshake", e))
    }
}

/// Handles shared by the tasks of one session.
#[derive(Clone)]
struct SessionCtx {
    sender: LinkSender,
    health: LinkHealth,
    heartbeat: HeartbeatGate,
    state: Arc<Mutex<HostState>>,
    running: Arc<AtomicBool>,
    console: Arc<dyn Console>,
}

impl SessionCtx {
    fn active(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.health.is_flatline()
    }

    /// Send one message. A failed write flatlines the link.
    fn send(&self, message: &Message) -> bool {
        match self.sender.send(message) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to send {}: {e}", message.tag());
                self.health.set_flatline();
                false
            }
        }
    }
}

fn spawn_reader(
    mut receiver: LinkReceiver,
    lines: mpsc::Sender<String>,
    health: LinkHealth,
    running: Arc<AtomicBool>,
    poll: Duration,
) -> Result<thread::JoinHandle<()>, HostError> {
    let handle = thread::Builder::new()
        .name("link-reader".to_string())
        .spawn(move || {
            while running.load(Ordering::SeqCst) && !health.is_flatline() {
                match receiver.recv_line(poll) {
                    Ok(Some(line)) => {
                        health.record_traffic();
                        if lines.blocking_send(line).is_err() {
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!("Link read failed: {e}");
                        health.set_flatline();
                        return;
                    }
                }
            }
        })?;
    Ok(handle)
}

async fn dispatch_loop(
    ctx: &SessionCtx,
    lines: &mut mpsc::Receiver<String>,
    prompts: &mpsc::Sender<bool>,
    poll: Duration,
) {
    while ctx.active() {
        let line = match time::timeout(poll, lines.recv()).await {
            Ok(Some(line)) => line,
            Ok(None) => {
                if ctx.running.load(Ordering::SeqCst) {
                    ctx.health.set_flatline();
                }
                break;
            }
            Err(_) => continue,
        };

        let message = match Message::parse(&line) {
            Ok(message) => message,
            Err(e) => {
                debug!("Unclassified line {line:?}: {e}");
                continue;
            }
        };

        let reaction = ctx.state.lock().dispatch(&message);
        match reaction {
            Reaction::None => {}
            Reaction::Narrate(notice) => {
                info!(%message, "Controller message");
                ctx.console.show(&notice);
            }
            Reaction::PromptSecret { retry } => {
                if prompts.try_send(retry).is_err() {
                    debug!("Secret prompt already pending");
                }
            }
        }
    }
}

async fn liveness_task(ctx: SessionCtx, tick: Duration, window_ticks: u32) {
    let mut window = LivenessWindow::new(window_ticks);
    let mut ticker = time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if !ctx.active() {
            return;
        }
        if window.tick(ctx.health.take_traffic()) == Liveness::Flatline {
            warn!(
                "No traffic from controller for {} ticks, link flatlined",
                window.silent_ticks()
            );
            ctx.health.set_flatline();
            return;
        }
    }
}

async fn heartbeat_task(ctx: SessionCtx, period: Duration) {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        ctx.heartbeat.wait_open().await;
        if !ctx.active() {
            return;
        }
        match ctx.heartbeat.send_if_open(|| ctx.send(&Message::Pulse)) {
            Some(false) => return,
            Some(true) => {}
            None => trace!("Heartbeat held, pulse skipped"),
        }
    }
}

struct DisplaySettings {
    image_dir: PathBuf,
    poll: Duration,
    ready_delay: Duration,
}

async fn display_task(
    ctx: SessionCtx,
    settings: DisplaySettings,
    viewer: Arc<dyn Viewer>,
    classifier: Arc<dyn Classifier>,
) {
    let mut watcher = ImageWatcher::new(settings.image_dir);
    // Captures from before this session are not offered again.
    match watcher.poll().await {
        Ok(Some(old)) => debug!("Existing capture {} skipped", old.display()),
        Ok(None) => {}
        Err(e) => warn!("Failed to scan {}: {e}", watcher.dir().display()),
    }

    let mut ticker = time::interval(settings.poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if !ctx.active() {
            return;
        }

        let gate = ctx.state.lock().take_gate();
        match gate {
            ClassifyGate::Classify => classify_current(&ctx, watcher.current(), &classifier).await,
            ClassifyGate::Retake => debug!("Retake requested, waiting for the next capture"),
            ClassifyGate::Pending => {}
        }

        match watcher.poll().await {
            Ok(Some(image)) => {
                show_image(&ctx, &viewer, image).await;
                let _hold = ctx.heartbeat.hold();
                if !ctx.send(&Message::Ready) {
                    return;
                }
                time::sleep(settings.ready_delay).await;
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to scan {}: {e}", watcher.dir().display()),
        }
    }
}

/// Show a new capture. A viewer failure is reported but `READY` still
/// follows, since the file is on disk for the operator to inspect.
async fn show_image(ctx: &SessionCtx, viewer: &Arc<dyn Viewer>, image: PathBuf) {
    let name = image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| image.display().to_string());
    let viewer = Arc::clone(viewer);
    let path = image.clone();

    match task::spawn_blocking(move || viewer.show(&path)).await {
        Ok(Ok(())) => ctx.console.show(&Notice::ImageShown { name }),
        Ok(Err(e)) => warn!("Viewer failed for {}: {e}", image.display()),
        Err(e) => warn!("Viewer task failed: {e}"),
    }
}

async fn classify_current(
    ctx: &SessionCtx,
    current: Option<&Path>,
    classifier: &Arc<dyn Classifier>,
) {
    let Some(image) = current.map(Path::to_path_buf) else {
        ctx.console.show(&Notice::ClassifyFailed(
            "no image has been displayed".to_string(),
        ));
        return;
    };

    let notice = match classifier.classify(&image).await {
        Ok(label) => {
            info!(%label, "Image classified");
            Notice::Classified(label)
        }
        Err(e) => {
            warn!("Classification failed: {e}");
            Notice::ClassifyFailed(e.to_string())
        }
    };
    ctx.console.show(&notice);
}

/// Read a secret per request and forward it with heartbeats held.
async fn prompt_task(
    ctx: SessionCtx,
    mut prompts: mpsc::Receiver<bool>,
    secrets: Arc<SecretReader>,
    secret_delay: Duration,
) {
    while let Some(retry) = prompts.recv().await {
        secrets.request(retry);
        let secret = match secrets.next().await {
            Some(Ok(secret)) => secret,
            Some(Err(e)) => {
                warn!("Failed to read secret: {e}");
                continue;
            }
            None => {
                warn!("Secret reader stopped");
                return;
            }
        };
        if !ctx.active() {
            return;
        }

        let _hold = ctx.heartbeat.hold();
        if !ctx.send(&Message::Secret(secret)) {
            return;
        }
        ctx.console.show(&Notice::SecretSent);
        time::sleep(secret_delay).await;
    }
}
