//! The state hub: single dispatch point for engine callbacks and client
//! commands.
//!
//! One task owns the account store, the call registry, the fan-out and the
//! engine handle. Every mutation — subscribe, unsubscribe, client command,
//! engine event — arrives through the hub's inbox and is processed to
//! completion, broadcasts included, before the next one. That serialization
//! is what keeps the collections single-writer and snapshot frames for a
//! channel in generation order; connection I/O itself still runs in parallel
//! per connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::accounts::AccountStore;
use crate::calls::CallRegistry;
use crate::engine::{EngineEvent, TelephonyEngine};
use crate::fanout::{ConnId, Fanout, FrameSender};
use crate::protocol::{AccountCommand, CallNotice, Channel};

/// Messages into the hub task.
#[derive(Debug)]
pub enum HubMsg {
    /// A new connection picked `channel`; it immediately receives that
    /// channel's current snapshot before any future broadcast.
    Subscribe {
        id: ConnId,
        channel: Channel,
        tx: FrameSender,
    },

    /// A connection closed (either side). Idempotent.
    Unsubscribe { id: ConnId },

    /// A text frame received from a client connection.
    Frame {
        id: ConnId,
        channel: Channel,
        text: String,
    },

    /// A telephony engine callback.
    Engine(EngineEvent),

    /// Orderly shutdown: flush persisted state and stop the task.
    Shutdown,
}

/// Cloneable handle into the hub task. Held by every connection handler and
/// by the engine integration as its event sink.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubMsg>,
    next_conn: Arc<AtomicU64>,
}

impl HubHandle {
    pub fn allocate_conn(&self) -> ConnId {
        self.next_conn.fetch_add(1, Ordering::Relaxed)
    }

    /// Queue a message for the hub task. After shutdown this is a no-op.
    pub fn send(&self, msg: HubMsg) {
        let _ = self.tx.send(msg);
    }
}

/// Spawn the hub task. Returns the handle and the task's join handle, which
/// resolves once a [`HubMsg::Shutdown`] has been fully processed.
pub fn spawn(accounts: AccountStore, engine: Box<dyn TelephonyEngine>) -> (HubHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let hub = Hub::new(accounts, engine);
    let task = tokio::spawn(hub.run(rx));
    (
        HubHandle {
            tx,
            next_conn: Arc::new(AtomicU64::new(1)),
        },
        task,
    )
}

pub struct Hub {
    accounts: AccountStore,
    calls: CallRegistry,
    fanout: Fanout,
    engine: Box<dyn TelephonyEngine>,
}

impl Hub {
    pub fn new(accounts: AccountStore, engine: Box<dyn TelephonyEngine>) -> Self {
        Self {
            accounts,
            calls: CallRegistry::new(),
            fanout: Fanout::new(),
            engine,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<HubMsg>) {
        while let Some(msg) = rx.recv().await {
            if !self.handle(msg) {
                break;
            }
        }
        tracing::info!("Hub stopped");
    }

    /// Process one message to completion. Returns `false` on shutdown.
    fn handle(&mut self, msg: HubMsg) -> bool {
        match msg {
            HubMsg::Subscribe { id, channel, tx } => {
                self.fanout.register(id, channel, tx);
                self.push_join_snapshot(id, channel);
            }

            HubMsg::Unsubscribe { id } => {
                self.fanout.unregister(id);
            }

            HubMsg::Frame { id, channel, text } => {
                self.on_frame(id, channel, &text);
            }

            HubMsg::Engine(event) => {
                self.on_engine_event(event);
            }

            HubMsg::Shutdown => {
                self.accounts.close(self.engine.as_mut());
                return false;
            }
        }
        true
    }

    /// Push the channel's current state to a connection that just joined, so
    /// no client ever observes deltas without a base state. Accounts and
    /// calls are computed fresh from the owned collections; the other
    /// channels replay their latest broadcast frame, if any.
    fn push_join_snapshot(&mut self, id: ConnId, channel: Channel) {
        match channel {
            Channel::Accounts => {
                let records = self.accounts.records().to_vec();
                self.fanout.send_snapshot_to(id, &records);
            }
            Channel::Calls => {
                let doc = self.calls.snapshot();
                self.fanout.send_snapshot_to(id, &doc);
            }
            _ => {
                if let Some(frame) = self.fanout.cached_snapshot(channel).map(str::to_owned) {
                    self.fanout.send_to(id, &frame);
                }
            }
        }
    }

    fn on_frame(&mut self, id: ConnId, channel: Channel, text: &str) {
        if channel != Channel::Accounts {
            tracing::debug!(conn = id, channel = %channel, "Ignoring frame on command-less channel");
            return;
        }

        let command = match serde_json::from_str::<AccountCommand>(text) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(conn = id, error = %e, "Unparseable account command");
                return;
            }
        };

        match command {
            AccountCommand::Add { account } => {
                self.accounts.add(account, self.engine.as_mut());
                self.broadcast_accounts();
            }
            AccountCommand::Delete { user, domain } => {
                if self.accounts.delete(&user, &domain, self.engine.as_mut()) {
                    self.broadcast_accounts();
                }
            }
        }
    }

    fn on_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::CallIncoming { id, peer } => {
                self.accounts.sync_current(self.engine.as_mut());
                self.broadcast_accounts();

                self.calls.on_incoming(id, peer);
                self.broadcast_calls();

                // Policy: the hub always answers automatically.
                if let Err(e) = self.engine.answer(id) {
                    tracing::warn!(call = %id, error = %e, "Auto-answer failed");
                }
            }

            EngineEvent::CallEstablished { id } => {
                self.accounts.sync_current(self.engine.as_mut());
                self.calls.on_established(id);
                self.broadcast_calls();
            }

            EngineEvent::CallClosed { id, reason } => {
                self.accounts.sync_current(self.engine.as_mut());
                self.calls.on_closed(id);

                let notice = CallNotice::Closed { message: reason };
                match serde_json::to_string(&notice) {
                    Ok(frame) => self.fanout.broadcast(Channel::Calls, &frame),
                    Err(e) => tracing::error!(error = %e, "Close notice serialization failed"),
                }
                self.broadcast_calls();
            }

            EngineEvent::RegisterOk { aor } => {
                tracing::info!(aor = aor.as_str(), "Register OK");
                self.accounts.set_status(&aor, true);
                self.broadcast_accounts();
            }

            EngineEvent::Unregistering { aor } => {
                tracing::info!(aor = aor.as_str(), "Unregistering");
                self.accounts.set_status(&aor, false);
                self.broadcast_accounts();
            }

            EngineEvent::RegisterFail { aor } => {
                tracing::info!(aor = aor.as_str(), "Register failed");
                self.accounts.set_status(&aor, false);
                self.broadcast_accounts();
            }
        }
    }

    fn broadcast_accounts(&mut self) {
        let records = self.accounts.records().to_vec();
        self.fanout.broadcast_snapshot(Channel::Accounts, &records);
    }

    fn broadcast_calls(&mut self) {
        let doc = self.calls.snapshot();
        self.fanout.broadcast_snapshot(Channel::Calls, &doc);
    }
}
