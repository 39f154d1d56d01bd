// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervised background job: lifecycle state machine and the remote
//! settings protocol.
//!
//! Every job owns two bus clients. The publisher registers a retained
//! last-will of `lost` on its `$state` topic, so observers can tell a crash
//! from a clean shutdown; the subscriber carries the passive listeners and
//! republishes the real state after every reconnect, overwriting a stale
//! last-will.

pub mod settings;

pub use settings::{SettingCell, SettingError, SettingValue, Settings};

use pio_bus::{
    Bus, BusError, BusFactory, BusRole, Callback, LastWill, Message, QoS, SubscribeOptions,
};
use pio_core::{topics, Ident, JobState};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Hook a job owner runs during the `disconnected` entry action. Errors are
/// logged and swallowed so teardown always completes.
pub type DisconnectHook = Box<dyn Fn() -> Result<(), JobError> + Send + Sync>;

/// Construction options.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    /// Raise SIGUSR1 at our own process after the `disconnected` teardown,
    /// so the binary's run loop exits deterministically. Off in tests.
    pub exit_on_disconnect: bool,
}

struct Clients {
    publisher: Arc<dyn Bus>,
    subscriber: Arc<dyn Bus>,
}

#[derive(Clone)]
struct ListenerReg {
    patterns: Vec<String>,
    opts: SubscribeOptions,
    callback: Callback,
}

/// A supervised job instance.
pub struct BackgroundJob {
    job_name: String,
    ident: Ident,
    state: Mutex<JobState>,
    settings: Settings,
    clients: Mutex<Clients>,
    listeners: Mutex<Vec<ListenerReg>>,
    bus_factory: BusFactory,
    shutdown: CancellationToken,
    options: JobOptions,
    on_disconnect: Mutex<Option<DisconnectHook>>,
    initialized: AtomicBool,
}

impl std::fmt::Debug for BackgroundJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundJob")
            .field("job_name", &self.job_name)
            .field("ident", &self.ident)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl BackgroundJob {
    /// Construct the job and drive it through `init` and `ready`.
    ///
    /// Fails if another process on this host is already running `job_name` -
    /// the per-host singleton guarantee.
    pub fn create(
        job_name: &str,
        ident: Ident,
        settings: Settings,
        bus_factory: BusFactory,
        options: JobOptions,
    ) -> Result<Arc<Self>, JobError> {
        check_for_duplicate_process(job_name)?;

        let clients = make_clients(&bus_factory, &ident, job_name)?;
        let job = Arc::new(Self {
            job_name: job_name.to_string(),
            ident,
            state: Mutex::new(JobState::Disconnected),
            settings,
            clients: Mutex::new(clients),
            listeners: Mutex::new(Vec::new()),
            bus_factory,
            shutdown: CancellationToken::new(),
            options,
            on_disconnect: Mutex::new(None),
            initialized: AtomicBool::new(false),
        });

        job.attach_reconnect_protocol();
        job.set_state(JobState::Init)?;
        job.set_state(JobState::Ready)?;
        Ok(job)
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn ident(&self) -> &Ident {
        &self.ident
    }

    pub fn state(&self) -> JobState {
        *self.state.lock()
    }

    /// Cancelled once the job has entered `disconnected`.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// The publishing client, shared with collaborators (PID telemetry,
    /// pumps) so all outbound traffic rides one connection.
    pub fn publisher(&self) -> Arc<dyn Bus> {
        Arc::clone(&self.clients.lock().publisher)
    }

    /// Install the owner's disconnect cleanup hook.
    pub fn set_on_disconnect(&self, hook: DisconnectHook) {
        *self.on_disconnect.lock() = Some(hook);
    }

    /// Register a passive listener. The registration is remembered so it can
    /// be replayed onto fresh clients when the job re-initializes.
    pub fn subscribe_and_callback(
        &self,
        patterns: Vec<String>,
        opts: SubscribeOptions,
        callback: Callback,
    ) -> Result<(), JobError> {
        // Clone the client out of the lock: subscribing may deliver retained
        // messages synchronously, and their callbacks may publish.
        let subscriber = Arc::clone(&self.clients.lock().subscriber);
        subscriber.subscribe(&patterns, opts, Callback::clone(&callback))?;
        self.listeners.lock().push(ListenerReg { patterns, opts, callback });
        Ok(())
    }

    /// Publish on the job's publisher client.
    pub fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), BusError> {
        // Clone the client out of the lock: delivery can be synchronous and
        // downstream callbacks may publish in turn.
        let publisher = Arc::clone(&self.clients.lock().publisher);
        publisher.publish(topic, payload, qos, retain)
    }

    /// Enter a lifecycle state, running its entry action. `lost` is
    /// broker-originated and cannot be entered from the job.
    pub fn set_state(self: &Arc<Self>, new_state: JobState) -> Result<(), JobError> {
        match new_state {
            JobState::Init => self.on_init(),
            JobState::Ready => {
                *self.state.lock() = JobState::Ready;
                info!(job = %self.job_name, "ready");
                self.publish_state();
                Ok(())
            }
            JobState::Sleeping => {
                *self.state.lock() = JobState::Sleeping;
                debug!(job = %self.job_name, "sleeping");
                self.publish_state();
                Ok(())
            }
            JobState::Disconnected => self.on_disconnected(),
            JobState::Lost => Err(JobError::InvalidState(JobState::Lost)),
        }
    }

    fn on_init(self: &Arc<Self>) -> Result<(), JobError> {
        *self.state.lock() = JobState::Init;
        debug!(job = %self.job_name, "init");

        if self.initialized.swap(true, Ordering::SeqCst) {
            // Re-entry (a remote `state/set`): tear down the previous clients
            // and bring up fresh ones, then replay every passive listener.
            let fresh = make_clients(&self.bus_factory, &self.ident, &self.job_name)?;
            {
                let mut clients = self.clients.lock();
                if let Err(e) = clients.publisher.disconnect() {
                    warn!("disconnecting stale publisher: {e}");
                }
                if let Err(e) = clients.subscriber.disconnect() {
                    warn!("disconnecting stale subscriber: {e}");
                }
                *clients = fresh;
            }
            self.attach_reconnect_protocol();
            let regs = self.listeners.lock().clone();
            let subscriber = Arc::clone(&self.clients.lock().subscriber);
            for reg in regs {
                subscriber.subscribe(&reg.patterns, reg.opts, reg.callback)?;
            }
        } else {
            self.register_general_listeners()?;
        }

        self.publish_state();
        self.declare_settable_properties();
        Ok(())
    }

    fn on_disconnected(self: &Arc<Self>) -> Result<(), JobError> {
        if *self.state.lock() == JobState::Disconnected {
            return Ok(());
        }

        // Owner cleanup first; a failing hook must not stop teardown. Taking
        // the hook out of the lock keeps a re-entrant state change inside the
        // hook from deadlocking, and guarantees it runs at most once.
        let hook = self.on_disconnect.lock().take();
        if let Some(hook) = hook {
            if let Err(e) = hook() {
                error!(job = %self.job_name, "on_disconnect hook failed: {e}");
            }
        }

        *self.state.lock() = JobState::Disconnected;
        info!(job = %self.job_name, "disconnected");
        self.publish_state();

        // Teardown last: the publisher carried the state publish above.
        let clients = self.clients.lock();
        if let Err(e) = clients.publisher.disconnect() {
            warn!("publisher disconnect: {e}");
        }
        if let Err(e) = clients.subscriber.disconnect() {
            warn!("subscriber disconnect: {e}");
        }
        drop(clients);

        self.shutdown.cancel();

        if self.options.exit_on_disconnect {
            if let Err(e) = nix::sys::signal::raise(nix::sys::signal::Signal::SIGUSR1) {
                error!("failed to raise exit signal: {e}");
            }
        }
        Ok(())
    }

    /// Homie-style declaration: `$properties` CSV plus a `$settable` flag
    /// per setting, and the current value of every setting, all retained.
    fn declare_settable_properties(&self) {
        let mut names: Vec<&str> = self.settings.names().collect();
        names.push("state");
        self.publish_logged(
            &topics::properties_topic(&self.ident, &self.job_name),
            names.join(",").as_bytes(),
            QoS::AtLeastOnce,
            true,
        );

        for name in names {
            self.publish_logged(
                &topics::settable_topic(&self.ident, &self.job_name, name),
                b"true",
                QoS::AtLeastOnce,
                true,
            );
        }

        for (name, setting) in self.settings.iter() {
            self.publish_attr(name, &setting.render());
        }
    }

    fn register_general_listeners(self: &Arc<Self>) -> Result<(), JobError> {
        let broadcast = Ident::new(pio_core::BROADCAST, self.ident.experiment.clone());
        let patterns = vec![
            topics::set_topic(&self.ident, &self.job_name, "+"),
            topics::set_topic(&broadcast, &self.job_name, "+"),
        ];

        let weak = Arc::downgrade(self);
        self.subscribe_and_callback(
            patterns,
            SubscribeOptions { qos: QoS::ExactlyOnce, ..Default::default() },
            Arc::new(move |msg: &Message| {
                if let Some(job) = Weak::upgrade(&weak) {
                    job.set_attr_from_message(msg);
                }
            }),
        )
    }

    /// Route one `…/<attr>/set` write.
    fn set_attr_from_message(self: &Arc<Self>, msg: &Message) {
        let Some(parsed) = topics::parse_set_topic(&msg.topic) else {
            return;
        };
        let raw = msg.text().into_owned();

        if parsed.attr == "state" {
            match raw.parse::<JobState>() {
                Ok(state) => {
                    if let Err(e) = self.set_state(state) {
                        warn!(job = %self.job_name, "remote state change rejected: {e}");
                    }
                }
                Err(e) => warn!(job = %self.job_name, "remote state change rejected: {e}"),
            }
            return;
        }

        // Names outside the editable set are silently ignored.
        let Some(setting) = self.settings.get(&parsed.attr) else {
            return;
        };

        match setting.apply(&raw) {
            Ok(rendered) => {
                self.publish_attr(&parsed.attr, &rendered);
                info!(job = %self.job_name, "Updated {} to {rendered}.", parsed.attr);
            }
            Err(e) => info!(job = %self.job_name, "{e}; keeping previous value"),
        }
    }

    /// Publish one setting value, retained.
    pub fn publish_attr(&self, attr: &str, rendered: &str) {
        self.publish_logged(
            &topics::attr_topic(&self.ident, &self.job_name, attr),
            rendered.as_bytes(),
            QoS::ExactlyOnce,
            true,
        );
    }

    fn publish_state(&self) {
        let state = self.state().to_string();
        self.publish_logged(
            &topics::state_topic(&self.ident, &self.job_name),
            state.as_bytes(),
            QoS::ExactlyOnce,
            true,
        );
    }

    fn publish_logged(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) {
        if let Err(e) = self.publish(topic, payload, qos, retain) {
            warn!(topic = %topic, "publish failed: {e}");
        }
    }

    fn attach_reconnect_protocol(self: &Arc<Self>) {
        // The subscriber's own pattern table is re-issued by the client; the
        // hook's job is to overwrite a stale retained `lost` with the truth.
        let weak = Arc::downgrade(self);
        self.clients.lock().subscriber.set_on_reconnect(Arc::new(move || {
            if let Some(job) = Weak::upgrade(&weak) {
                job.publish_state();
            }
        }));
    }
}

fn make_clients(factory: &BusFactory, ident: &Ident, job_name: &str) -> Result<Clients, JobError> {
    let last_will = LastWill {
        topic: topics::state_topic(ident, job_name),
        payload: JobState::Lost.to_string().into_bytes(),
        qos: QoS::ExactlyOnce,
        retain: true,
    };
    Ok(Clients {
        publisher: factory(BusRole::Publisher { last_will })?,
        subscriber: factory(BusRole::Subscriber)?,
    })
}

/// Per-host singleton guard: scan the process table for another process
/// whose command line names this job.
fn check_for_duplicate_process(job_name: &str) -> Result<(), JobError> {
    let sys = sysinfo::System::new_all();
    let me = sysinfo::get_current_pid().ok();
    let duplicates = sys
        .processes()
        .iter()
        .filter(|(pid, _)| Some(**pid) != me)
        .filter(|(_, process)| {
            process.cmd().iter().any(|arg| arg.to_string_lossy().contains(job_name))
        })
        .count();
    if duplicates > 0 {
        warn!("{job_name} is already running. Aborting.");
        return Err(JobError::DuplicateJob(job_name.to_string()));
    }
    Ok(())
}

/// Background-job errors.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0} is already running. Aborting.")]
    DuplicateJob(String),

    #[error("state {0} cannot be entered by the job")]
    InvalidState(JobState),

    #[error(transparent)]
    Bus(#[from] BusError),
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
