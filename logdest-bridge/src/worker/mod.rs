//! Threaded delivery loop for one destination.
//!
//! A [`DestinationWorker`] owns a [`PluginRef`] on a dedicated thread. The host
//! sends records through a channel; the worker turns each into a message view,
//! queues it, and flushes after every round that delivered something. A record
//! the destination rejects stays at the front of the backlog and is retried in
//! the next round, so ordering is preserved. Once stopped, or once every sender
//! is gone, the worker delivers what it still holds for as long as that makes
//! progress, then issues `deinit` exactly once.

mod signal_handler;
mod stop_handle;

pub use signal_handler::SignalHandler;
pub use stop_handle::StopHandle;

use crate::bridge::PluginRef;
use crate::message::{Fields, MessageStore};
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long the worker waits for new records before re-checking its stop flag
/// and retrying rejected ones.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Rounds without progress tolerated for the remaining backlog once the worker
/// was stopped or its senders went away.
const FINAL_ATTEMPTS: usize = 3;

/// Counters reported when a worker finishes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub accepted: u64,
    pub rejected: u64,
    pub flushes: u64,
    /// Records that never reached the destination.
    pub dropped: u64,
    /// `init` failed and the worker only discarded records.
    pub disabled: bool,
}

pub struct DestinationWorker {
    name: String,
    sender: Option<Sender<Fields>>,
    stop: StopHandle,
    thread: Option<JoinHandle<WorkerStats>>,
}

impl DestinationWorker {
    pub fn spawn(
        name: impl Into<String>,
        plugin: PluginRef,
        messages: Arc<MessageStore>,
    ) -> std::io::Result<Self> {
        Self::spawn_with(name, plugin, messages, DEFAULT_POLL_INTERVAL)
    }

    pub fn spawn_with(
        name: impl Into<String>,
        plugin: PluginRef,
        messages: Arc<MessageStore>,
        poll_interval: Duration,
    ) -> std::io::Result<Self> {
        let name = name.into();
        let (sender, receiver) = mpsc::channel();
        let stop = StopHandle::default();

        let delivery = Delivery {
            plugin,
            messages,
            receiver,
            stop: stop.clone(),
            poll_interval,
            backlog: VecDeque::new(),
            stats: WorkerStats::default(),
        };
        let thread = thread::Builder::new()
            .name(format!("logdest-{name}"))
            .spawn(move || delivery.run())?;
        log::info!("Started worker for destination {name}");

        Ok(Self {
            name,
            sender: Some(sender),
            stop,
            thread: Some(thread),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hand a record to the worker. Returns `false` once the worker is gone.
    pub fn send(&self, fields: Fields) -> bool {
        self.sender
            .as_ref()
            .is_some_and(|sender| sender.send(fields).is_ok())
    }

    /// A sender other threads can feed records through.
    pub fn sender(&self) -> Option<Sender<Fields>> {
        self.sender.clone()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Stop the worker and wait for it to finish.
    pub fn shutdown(mut self) -> WorkerStats {
        self.finish()
    }

    /// Wait for the worker to finish without requesting a stop. Returns once a
    /// stop handle was tripped or every sender was dropped.
    pub fn join(mut self) -> WorkerStats {
        self.sender = None;
        self.wait()
    }

    fn finish(&mut self) -> WorkerStats {
        self.stop.stop();
        self.sender = None;
        self.wait()
    }

    fn wait(&mut self) -> WorkerStats {
        let Some(thread) = self.thread.take() else {
            return WorkerStats::default();
        };
        match thread.join() {
            Ok(stats) => {
                log::info!("Worker for destination {} finished: {stats:?}", self.name);
                stats
            }
            Err(_) => {
                log::error!("Worker for destination {} panicked", self.name);
                WorkerStats::default()
            }
        }
    }
}

impl Drop for DestinationWorker {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.finish();
        }
    }
}

impl std::fmt::Debug for DestinationWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestinationWorker")
            .field("name", &self.name)
            .field("running", &self.stop.is_running())
            .finish_non_exhaustive()
    }
}

/// State owned by the worker thread.
struct Delivery {
    plugin: PluginRef,
    messages: Arc<MessageStore>,
    receiver: Receiver<Fields>,
    stop: StopHandle,
    poll_interval: Duration,
    backlog: VecDeque<Fields>,
    stats: WorkerStats,
}

impl Delivery {
    fn run(mut self) -> WorkerStats {
        if self.plugin.init() {
            self.deliver_until_stopped();
            self.deliver_remaining();
        } else {
            self.stats.disabled = true;
            self.discard_until_stopped();
        }

        self.drain_channel();
        self.stats.dropped += self.backlog.len() as u64;
        self.backlog.clear();
        self.plugin.deinit();
        self.stats
    }

    fn deliver_until_stopped(&mut self) {
        while self.stop.is_running() && self.receive() {
            self.drain_channel();
            self.deliver_round();
        }
    }

    /// Deliver what is left once stopped or disconnected. Gives up after
    /// `FINAL_ATTEMPTS` consecutive rounds without progress.
    fn deliver_remaining(&mut self) {
        self.drain_channel();
        let mut stalled = 0;
        while !self.backlog.is_empty() && stalled < FINAL_ATTEMPTS {
            if self.deliver_round() > 0 {
                stalled = 0;
            } else {
                stalled += 1;
                thread::sleep(self.poll_interval);
            }
        }
    }

    fn discard_until_stopped(&mut self) {
        while self.stop.is_running() && self.receive() {
            self.drain_channel();
            self.stats.dropped += self.backlog.len() as u64;
            self.backlog.clear();
        }
    }

    /// Wait up to one poll interval for a record. `false` once every sender is gone.
    fn receive(&mut self) -> bool {
        match self.receiver.recv_timeout(self.poll_interval) {
            Ok(fields) => {
                self.backlog.push_back(fields);
                true
            }
            Err(RecvTimeoutError::Timeout) => true,
            Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    fn drain_channel(&mut self) {
        loop {
            match self.receiver.try_recv() {
                Ok(fields) => self.backlog.push_back(fields),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
    }

    /// Queue backlog records in order until one is rejected, then flush if
    /// anything went through. Returns the number of records delivered.
    fn deliver_round(&mut self) -> u64 {
        let mut delivered = 0u64;
        while let Some(fields) = self.backlog.front() {
            let handle = match self.messages.insert(fields.clone()) {
                Ok(handle) => handle,
                Err(e) => {
                    log::error!("Dropping record for {}: {e}", self.plugin.class().id());
                    self.backlog.pop_front();
                    self.stats.dropped += 1;
                    continue;
                }
            };
            if self.plugin.queue(handle) {
                self.backlog.pop_front();
                delivered += 1;
            } else {
                self.stats.rejected += 1;
                log::debug!(
                    "Destination {} rejected a record, {} waiting",
                    self.plugin.class().id(),
                    self.backlog.len()
                );
                break;
            }
        }

        self.stats.accepted += delivered;
        if delivered > 0 {
            if !self.plugin.flush() {
                log::warn!("Destination {} failed to flush", self.plugin.class().id());
            }
            self.stats.flushes += 1;
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::PluginHost;
    use crate::loader::{ClassLoader, ClassRegistrar, StaticSource};
    use crate::message::LogMessage;
    use crate::options::ConfigStore;
    use crate::plugin::{Capabilities, Destination, DestinationContext};
    use std::sync::Mutex;

    static DELIVERED: Mutex<Vec<String>> = Mutex::new(Vec::new());

    /// Rejects every other queue call, so each record needs a retry.
    struct Flaky {
        tag: String,
        reject_next: bool,
        deinits: u32,
    }

    impl Destination for Flaky {
        fn init(&mut self) -> bool {
            !self.tag.is_empty()
        }
        fn deinit(&mut self) {
            self.deinits += 1;
            DELIVERED
                .lock()
                .unwrap()
                .push(format!("{}:deinit:{}", self.tag, self.deinits));
        }
        fn queue(&mut self, message: &LogMessage) -> bool {
            self.reject_next = !self.reject_next;
            if self.reject_next {
                return false;
            }
            let text = message.get_value("MESSAGE").ok().flatten().unwrap_or_default();
            DELIVERED.lock().unwrap().push(format!("{}:{text}", self.tag));
            true
        }
        fn flush(&mut self) -> bool {
            true
        }
    }

    fn flaky(ctx: DestinationContext) -> Box<dyn Destination> {
        Box::new(Flaky {
            tag: ctx.options().get_or("tag", ""),
            reject_next: false,
            deinits: 0,
        })
    }

    fn module(registrar: &mut dyn ClassRegistrar) {
        registrar.register("Flaky", Capabilities::DESTINATION, flaky);
    }

    fn worker(tag: &str) -> (DestinationWorker, Arc<MessageStore>) {
        let source = StaticSource::new();
        source.install("/plugins", module);
        let config = Arc::new(ConfigStore::new());
        let messages = Arc::new(MessageStore::new());
        let host = PluginHost::new(
            ClassLoader::new(source).unwrap(),
            config.clone(),
            messages.clone(),
        );
        let mut options = std::collections::BTreeMap::new();
        options.insert("tag".to_string(), tag.to_string());
        let plugin = host
            .create_from(config.register(options).unwrap(), "/plugins", "Flaky")
            .unwrap();
        let worker =
            DestinationWorker::spawn_with(tag, plugin, messages.clone(), Duration::from_millis(5))
                .unwrap();
        (worker, messages)
    }

    fn record(text: &str) -> Fields {
        let mut fields = Fields::new();
        fields.insert("MESSAGE".to_string(), text.to_string());
        fields
    }

    fn delivered_for(tag: &str) -> Vec<String> {
        let prefix = format!("{tag}:");
        DELIVERED
            .lock()
            .unwrap()
            .iter()
            .filter_map(|entry| entry.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    #[test]
    fn test_rejected_records_are_retried_in_order() {
        let (worker, messages) = worker("ordered");
        for text in ["one", "two", "three"] {
            assert!(worker.send(record(text)));
        }
        while delivered_for("ordered").len() < 3 {
            thread::sleep(Duration::from_millis(5));
        }
        let stats = worker.shutdown();

        assert_eq!(
            delivered_for("ordered"),
            vec!["one", "two", "three", "deinit:1"]
        );
        assert_eq!(stats.accepted, 3);
        assert_eq!(stats.rejected, 3);
        assert!(stats.flushes >= 1);
        assert_eq!(stats.dropped, 0);
        assert!(!stats.disabled);
        assert_eq!(messages.live(), 0);
    }

    #[test]
    fn test_failed_init_discards_records() {
        let (worker, messages) = worker("");
        assert!(worker.send(record("lost")));
        thread::sleep(Duration::from_millis(20));
        let stats = worker.shutdown();

        assert!(stats.disabled);
        assert_eq!(stats.accepted, 0);
        assert_eq!(stats.dropped, 1);
        assert_eq!(messages.live(), 0);
    }

    #[test]
    fn test_stop_handle_stops_worker() {
        let (worker, _messages) = worker("stopped");
        worker.stop_handle().stop();
        let stats = worker.join();
        assert_eq!(stats, WorkerStats::default());
        assert_eq!(delivered_for("stopped"), vec!["deinit:1"]);
    }
}
