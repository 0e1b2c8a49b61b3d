//! Config-driven supervision.
//!
//! Keeps one playback running for the configured `input_file`. The configuration is
//! polled from a [`ConfigFeed`]; when it changes, the new one is accepted (the remote feed
//! rewrites the rc file) and playback restarts with it. Poll failures keep the current
//! playback going.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use disk_player::state::StopHandle;
use serde::Serialize;

use crate::rc::RcConfig;

const FETCH_TIMEOUT: Duration = Duration::from_secs(3);

/// Where configurations come from.
pub trait ConfigFeed {
    fn fetch(&mut self) -> Result<RcConfig>;

    /// Called for the initial configuration and for every change.
    fn accept(&mut self, _config: &RcConfig) -> Result<()> {
        Ok(())
    }
}

#[derive(Serialize)]
struct ConfigRequest<'a> {
    mac: &'a str,
}

/// `POST http://<host>/config` with this device's MAC address; accepted configs are
/// written to the rc file.
pub struct RemoteFeed {
    url: String,
    mac: String,
    rc_path: PathBuf,
}

impl RemoteFeed {
    pub fn new(host: &str, mac: &str, rc_path: PathBuf) -> Self {
        Self {
            url: format!("http://{host}/config"),
            mac: mac.to_string(),
            rc_path,
        }
    }
}

impl ConfigFeed for RemoteFeed {
    fn fetch(&mut self) -> Result<RcConfig> {
        let mut resp = ureq::post(&self.url)
            .config()
            .timeout_per_call(Some(FETCH_TIMEOUT))
            .build()
            .send_json(ConfigRequest { mac: &self.mac })
            .map_err(|e| anyhow!("config request to {} failed: {e}", self.url))?;
        resp.body_mut()
            .read_json()
            .map_err(|e| anyhow!("config decode failed: {e}"))
    }

    fn accept(&mut self, config: &RcConfig) -> Result<()> {
        config.write_atomic(&self.rc_path)
    }
}

/// Re-reads a local rc file on every poll.
pub struct FileFeed {
    path: PathBuf,
}

impl FileFeed {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl ConfigFeed for FileFeed {
    fn fetch(&mut self) -> Result<RcConfig> {
        RcConfig::load(&self.path)
    }
}

/// Log filter directive for an rc `verbosity` level.
pub fn verbosity_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// A playback running on its own `player` thread.
struct PlayerThread {
    stop: StopHandle,
    handle: JoinHandle<()>,
}

impl PlayerThread {
    fn start<L>(config: RcConfig, launch: Arc<L>) -> Result<Self>
    where
        L: Fn(&RcConfig, StopHandle) + Send + Sync + 'static,
    {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let handle = thread::Builder::new()
            .name("player".to_string())
            .spawn(move || {
                // The session parks this thread, so the stop handle must wake it.
                let stop = StopHandle::for_current_thread();
                if tx.send(stop.clone()).is_err() {
                    return;
                }
                launch(&config, stop);
            })
            .context("spawn player thread")?;
        let stop = rx.recv().context("player thread exited before starting")?;
        Ok(Self { stop, handle })
    }

    fn stop(self) {
        self.stop.request();
        if self.handle.join().is_err() {
            tracing::error!("player thread panicked");
        }
    }
}

/// Run until `shutdown` is requested. Returns how many playbacks were launched.
///
/// `shutdown` must belong to the calling thread; it is parked between polls.
pub fn supervise<F, L>(
    mut feed: F,
    launch: L,
    default_poll: Duration,
    shutdown: &StopHandle,
    mut on_verbosity: impl FnMut(u8),
) -> Result<u32>
where
    F: ConfigFeed,
    L: Fn(&RcConfig, StopHandle) + Send + Sync + 'static,
{
    let mut config = feed.fetch().context("fetch initial configuration")?;
    feed.accept(&config)?;
    let launch = Arc::new(launch);
    let mut launches = 0;

    loop {
        on_verbosity(config.verbosity);
        tracing::info!(input_file = %config.input_file.display(), "starting playback");
        let player = PlayerThread::start(config.clone(), launch.clone())?;
        launches += 1;

        let next = loop {
            if shutdown.is_requested() {
                player.stop();
                return Ok(launches);
            }
            thread::park_timeout(config.poll_interval_or(default_poll));
            if shutdown.is_requested() {
                continue;
            }
            match feed.fetch() {
                Ok(fresh) if fresh != config => break fresh,
                Ok(_) => {}
                Err(e) => tracing::warn!("config poll failed: {e:#}"),
            }
        };

        tracing::info!("configuration changed; restarting playback");
        feed.accept(&next)?;
        player.stop();
        config = next;
    }
}
