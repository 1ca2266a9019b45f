//! Automated load driver
//!
//! Issues rounds of `n_adds` adds followed by `n_adds / 2` removes, one
//! operation per `broadcast_interval`, for `run_time`. It then reads the
//! replicated state, waits `cooldown_time` and writes a summary to
//! `log_dir/log<port>.txt`.

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::Context;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info};

use concord_core::PeerId;
use concord_crdt::{digest_elements, Reply, Request};
use concord_runtime::{AppConfig, ServiceHandle};

struct Driver {
    local: PeerId,
    app: AppConfig,
    rng: StdRng,
    /// Elements this driver believes present, from its own replies and the final read
    state: BTreeSet<String>,
    next_message: u64,
    round_adds: usize,
    round_removes: usize,
    total_adds: u64,
    total_removes: u64,
}

impl Driver {
    fn new(local: PeerId, app: AppConfig) -> Self {
        Driver {
            local,
            app,
            rng: StdRng::from_entropy(),
            state: BTreeSet::new(),
            next_message: 0,
            round_adds: 0,
            round_removes: 0,
            total_adds: 0,
            total_removes: 0,
        }
    }

    fn element(&mut self) -> String {
        let noise: String = (0..self.app.payload_size)
            .map(|_| self.rng.gen_range(b'A'..=b'Z') as char)
            .collect();
        let element = format!("{} MSG{}{}", self.local, self.next_message, noise);
        self.next_message += 1;
        element
    }

    /// The request for the next timer tick, if any
    fn next_request(&mut self) -> Option<Request> {
        if self.round_adds < self.app.n_adds {
            self.round_adds += 1;
            return Some(Request::Add(self.element()));
        }

        let request = self.state.iter().next().cloned().map(Request::Remove);
        self.round_removes += 1;
        if self.round_removes >= self.app.n_adds / 2 {
            self.round_adds = 0;
            self.round_removes = 0;
        }
        request
    }

    fn on_reply(&mut self, reply: Reply) {
        match reply {
            Reply::Add { element } => {
                self.state.insert(element);
                self.total_adds += 1;
            }
            Reply::Remove { element } => {
                self.state.remove(&element);
                self.total_removes += 1;
            }
            Reply::Read { elements } => self.state = elements,
        }
    }

    fn summary(&self) -> String {
        format!(
            "Total adds: {}\nTotal removes: {}\nState: {}\n",
            self.total_adds,
            self.total_removes,
            digest_elements(&self.state)
        )
    }

    fn log_path(&self) -> PathBuf {
        self.app.log_dir.join(format!("log{}.txt", self.local.port()))
    }
}

pub async fn run(mut handle: ServiceHandle, local: PeerId, app: &AppConfig) -> anyhow::Result<()> {
    let mut driver = Driver::new(local, app.clone());
    info!(
        prepare = ?app.prepare_time,
        interval = ?app.broadcast_interval,
        run = ?app.run_time,
        "automated driver waiting for the mesh"
    );
    sleep(app.prepare_time).await;

    let stop = sleep(app.run_time);
    tokio::pin!(stop);
    let mut ticker = interval(app.broadcast_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = ticker.tick() => {
                if let Some(request) = driver.next_request() {
                    debug!(?request, "driver request");
                    handle.requests.send(request).await.context("service stopped")?;
                }
            }
            reply = handle.replies.recv() => match reply {
                Some(reply) => driver.on_reply(reply),
                None => anyhow::bail!("service stopped"),
            },
        }
    }

    info!("run time over, reading final state");
    handle.requests.send(Request::Read).await.context("service stopped")?;
    let cooldown = sleep(app.cooldown_time);
    tokio::pin!(cooldown);
    loop {
        tokio::select! {
            _ = &mut cooldown => break,
            reply = handle.replies.recv() => match reply {
                Some(reply) => driver.on_reply(reply),
                None => break,
            },
        }
    }

    let path = driver.log_path();
    std::fs::create_dir_all(&app.log_dir)
        .with_context(|| format!("cannot create {}", app.log_dir.display()))?;
    std::fs::write(&path, driver.summary())
        .with_context(|| format!("cannot write {}", path.display()))?;
    info!(
        path = %path.display(),
        adds = driver.total_adds,
        removes = driver.total_removes,
        elements = driver.state.len(),
        "summary written"
    );
    Ok(())
}
