//! The explicitly constructed pipeline object.
//!
//! [`Pipeline`] owns everything the two loops share: the batch queue, the
//! pacing controller, the rendezvous, counters, and the feedback counter.
//! The host constructs one per session and hands its pieces out:
//!
//! ```text
//! Pipeline ──producer()───▶ ProducerLoop   (simulation thread, exactly one)
//!          ──drain_loop()─▶ DrainLoop      (render thread, exactly one)
//!          ──sink()───────▶ PacketSink     (any thread, cloneable ingress)
//!          ──requests()───▶ RequestClient  (any thread, cloneable)
//! ```

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info};

use tandem_core::{BoxedPacket, EnqueueError, Packet};

use crate::config::{ConfigError, PacingConfig};
use crate::drain::DrainLoop;
use crate::feedback::IntegrationFeedback;
use crate::handoff::Rendezvous;
use crate::metrics::{Counters, PipelineMetrics};
use crate::pacing::{PacingController, PacingSnapshot, SyncMode};
use crate::producer::ProducerLoop;
use crate::queue::{BatchQueue, Discarded};
use crate::requests::{Request, RequestClient};

/// State shared by every handle of one pipeline.
pub(crate) struct Shared<S> {
    pub config: PacingConfig,
    pub queue: BatchQueue<S>,
    pub pacing: PacingController,
    pub rendezvous: Arc<Rendezvous>,
    pub counters: Counters,
    pub feedback: IntegrationFeedback,
}

impl<S> Shared<S> {
    fn new(config: PacingConfig) -> Self {
        let pacing = PacingController::new(&config);
        let rendezvous = Arc::new(Rendezvous::new(pacing.mode()));
        Self {
            config,
            queue: BatchQueue::new(),
            pacing,
            rendezvous,
            counters: Counters::default(),
            feedback: IntegrationFeedback::new(),
        }
    }

    /// The single ingress path: append to the open batch and count it.
    pub fn enqueue(&self, packet: BoxedPacket<S>) -> Result<(), EnqueueError> {
        let label = packet.label();
        match self.queue.enqueue(packet) {
            Ok(()) => {
                Counters::bump(&self.counters.packets_enqueued);
                Ok(())
            }
            Err(e) => {
                Counters::bump(&self.counters.rejected_after_shutdown);
                debug!(packet = label, "packet rejected: pipeline shut down");
                Err(e)
            }
        }
    }

    /// Re-read the pacing mode and publish it to the rendezvous.
    pub fn publish_mode(&self) -> SyncMode {
        let mode = self.pacing.mode();
        self.rendezvous.set_mode(mode);
        mode
    }

    pub fn record_discarded(&self, discarded: Discarded) {
        Counters::add(&self.counters.batches_discarded, discarded.batches as u64);
        Counters::add(&self.counters.packets_discarded, discarded.packets as u64);
    }

    pub fn metrics(&self) -> PipelineMetrics {
        let pacing = self.pacing.snapshot();
        self.counters
            .snapshot(pacing.transitions, pacing.forced_desyncs)
    }
}

/// The shared producer/consumer pipeline for one session.
pub struct Pipeline<S> {
    shared: Arc<Shared<S>>,
    requests_tx: Sender<Request<S>>,
    requests_rx: Receiver<Request<S>>,
    producer_issued: bool,
    drain_issued: bool,
}

impl<S: 'static> Pipeline<S> {
    /// Validate `config` and build an idle pipeline in Sync mode.
    pub fn new(config: PacingConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let (requests_tx, requests_rx) = crossbeam_channel::bounded(config.request_queue_capacity);
        Ok(Self {
            shared: Arc::new(Shared::new(config)),
            requests_tx,
            requests_rx,
            producer_issued: false,
            drain_issued: false,
        })
    }

    /// The producer loop. `Some` exactly once.
    pub fn producer(&mut self) -> Option<ProducerLoop<S>> {
        if self.producer_issued {
            return None;
        }
        self.producer_issued = true;
        Some(ProducerLoop::new(Arc::clone(&self.shared)))
    }

    /// The consumer drain loop. `Some` exactly once.
    pub fn drain_loop(&mut self) -> Option<DrainLoop<S>> {
        if self.drain_issued {
            return None;
        }
        self.drain_issued = true;
        Some(DrainLoop::new(
            Arc::clone(&self.shared),
            self.requests_rx.clone(),
        ))
    }

    pub(crate) fn shared(&self) -> &Arc<Shared<S>> {
        &self.shared
    }

    /// Both loops at once, for a freshly built pipeline.
    pub(crate) fn issue_loops(&mut self) -> (ProducerLoop<S>, DrainLoop<S>) {
        self.producer_issued = true;
        self.drain_issued = true;
        (
            ProducerLoop::new(Arc::clone(&self.shared)),
            DrainLoop::new(Arc::clone(&self.shared), self.requests_rx.clone()),
        )
    }

    /// A cloneable ingress handle appending to the open batch.
    pub fn sink(&self) -> PacketSink<S> {
        PacketSink {
            shared: Arc::clone(&self.shared),
        }
    }

    /// A cloneable handle for consumer-thread requests.
    pub fn requests(&self) -> RequestClient<S> {
        RequestClient::new(
            self.requests_tx.clone(),
            Arc::clone(&self.shared.rendezvous),
        )
    }

    /// Wake every waiter and make both loops exit after their current
    /// unit of work. Batches stay queued until [`shutdown`](Self::shutdown).
    pub fn signal_shutdown(&self) {
        self.shared.rendezvous.shutdown();
    }

    /// Signal shutdown, reject further ingress, and drop every undrained
    /// batch. Unserved requests are dropped too, so their waiters see
    /// [`RequestError::Disconnected`](crate::requests::RequestError::Disconnected).
    /// Idempotent.
    pub fn shutdown(&self) -> Discarded {
        self.signal_shutdown();
        let discarded = self.shared.queue.close();
        self.shared.record_discarded(discarded);
        let requests_dropped = self.requests_rx.try_iter().count();
        if discarded != Discarded::default() || requests_dropped > 0 {
            info!(
                batches = discarded.batches,
                packets = discarded.packets,
                requests_dropped,
                "pipeline shut down; undrained work discarded"
            );
        }
        discarded
    }

    /// Whether shutdown has been signalled.
    pub fn is_shut_down(&self) -> bool {
        self.shared.rendezvous.is_shutdown()
    }

    /// Current pacing mode.
    pub fn mode(&self) -> SyncMode {
        self.shared.pacing.mode()
    }

    /// Pacing controller snapshot.
    pub fn pacing(&self) -> PacingSnapshot {
        self.shared.pacing.snapshot()
    }

    /// Cumulative counters.
    pub fn metrics(&self) -> PipelineMetrics {
        self.shared.metrics()
    }

    /// Sealed batches waiting for the consumer.
    pub fn pending(&self) -> usize {
        self.shared.queue.pending()
    }

    /// The validated configuration.
    pub fn config(&self) -> &PacingConfig {
        &self.shared.config
    }
}

/// Cloneable packet ingress for mutation sites outside the simulation step.
///
/// Packets land in the currently open batch and are sealed with the
/// producer's next tick.
pub struct PacketSink<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for PacketSink<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: 'static> PacketSink<S> {
    /// Enqueue a packet. Fails fast once the pipeline has shut down.
    pub fn enqueue<P: Packet<S> + 'static>(&self, packet: P) -> Result<(), EnqueueError> {
        self.shared.enqueue(Box::new(packet))
    }

    /// Enqueue an already boxed packet.
    pub fn enqueue_boxed(&self, packet: BoxedPacket<S>) -> Result<(), EnqueueError> {
        self.shared.enqueue(packet)
    }

    /// Whether the pipeline has shut down.
    pub fn is_shut_down(&self) -> bool {
        self.shared.rendezvous.is_shutdown()
    }
}
