//! Publish stream handler.
//!
//! ```text
//!   AwaitingInit ──init──► Active ──close / error──► Draining ──► Closed
//!        │                   │
//!        └─ error response   ├─ ingestion loop (this task): append, count, batch acks
//!                            └─ outbound task: queue | heartbeat tick | stop signal
//! ```
//!
//! The outbound task is the only writer of the response sink. The ingestion
//! loop hands it acks through a bounded queue and blocks when the queue is
//! full. Heartbeats and the close request are written by the outbound task
//! itself.
//!
//! Session cleanup lives in a drop guard, so it runs exactly once whether the
//! handler returns normally, fails, or its future is dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::stream::{RequestStream, ResponseSink, StreamContext};
use crate::cluster::metrics;
use crate::cluster::{
    BrokerError, BrokerResult, LocalPartition, PartitionManager, PublishConfig, PublisherSession,
    session_id,
};
use crate::protocol::{InitMessage, PublishRequest, PublishResponse};

const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1);

pub struct PublishHandler {
    partitions: Arc<PartitionManager>,
    config: PublishConfig,
}

impl PublishHandler {
    /// Zero heartbeat intervals and queue capacities are raised to their
    /// smallest usable values.
    pub fn new(partitions: Arc<PartitionManager>, mut config: PublishConfig) -> Self {
        config.heartbeat_interval = config.heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL);
        config.response_queue_capacity = config.response_queue_capacity.max(1);
        Self { partitions, config }
    }

    pub fn partitions(&self) -> &Arc<PartitionManager> {
        &self.partitions
    }

    pub fn config(&self) -> &PublishConfig {
        &self.config
    }

    /// Serve one publish stream from handshake to teardown.
    ///
    /// Returns `Ok(())` when the client closed the stream cleanly. Any error
    /// has already been reported to the client when it can be.
    #[tracing::instrument(skip_all, fields(peer = %ctx.peer_addr))]
    pub async fn handle<R, S>(
        &self,
        ctx: &StreamContext,
        mut requests: R,
        mut responses: S,
    ) -> BrokerResult<()>
    where
        R: RequestStream,
        S: ResponseSink,
    {
        let init = await_init(&mut requests, &mut responses).await?;
        let topic = init.topic.clone();
        let partition = init.partition;
        let session = Arc::new(PublisherSession::new(session_id(
            &ctx.peer_addr,
            &topic,
            &partition,
        )));

        let local = match self
            .partitions
            .attach_publisher(&topic, &partition, &session)
            .await
        {
            Ok(local) => local,
            Err(e) => {
                warn!(topic = %topic, partition = %partition, error = %e, "Publish stream rejected");
                let response = PublishResponse::error(e.client_message(&topic, &partition));
                send_response(&mut responses, &response, session.id()).await;
                return Err(e);
            }
        };
        let mut guard = SessionGuard::new(
            Arc::clone(&self.partitions),
            Arc::clone(&local),
            Arc::clone(&session),
        );

        let ack_interval = init.effective_ack_interval();
        info!(
            topic = %topic,
            partition = %partition,
            session = %session.id(),
            ack_interval,
            "Publisher connected"
        );
        send_response(&mut responses, &PublishResponse::accepted(), session.id()).await;

        let (queue, pending) = mpsc::channel(self.config.response_queue_capacity);
        let outbound = run_outbound(
            responses,
            pending,
            Arc::clone(&session),
            local.stop_signal(),
            self.config.heartbeat_interval,
        )
        .instrument(info_span!("outbound", session = %session.id()));
        guard.outbound = Some(tokio::spawn(outbound));

        let result = ingest(&mut requests, &local, &session, &queue, ack_interval).await;
        guard.outcome = if result.is_ok() { "closed" } else { "error" };

        let outbound = guard.outbound.take();
        session.set_stopping();
        drop(queue);
        drop(guard);
        if let Some(outbound) = outbound {
            self.drain(outbound, session.id()).await;
        }
        result
    }

    /// Wait for the outbound task to flush what is still queued.
    async fn drain(&self, mut outbound: JoinHandle<()>, session: &str) {
        match timeout(self.config.drain_timeout, &mut outbound).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(session, error = %e, "Outbound task failed"),
            Err(_) => {
                warn!(
                    session,
                    timeout_ms = self.config.drain_timeout.as_millis() as u64,
                    "Outbound drain timed out, dropping queued responses"
                );
                outbound.abort();
            }
        }
    }
}

/// Read the handshake. Anything but an Init first is fatal.
async fn await_init<R, S>(requests: &mut R, responses: &mut S) -> BrokerResult<InitMessage>
where
    R: RequestStream,
    S: ResponseSink,
{
    let failure = match requests.recv().await {
        Ok(Some(PublishRequest::Init(init))) => return Ok(init),
        Ok(Some(other)) => {
            debug!(request = other.name(), "Stream did not start with init");
            BrokerError::MissingInit
        }
        Ok(None) => BrokerError::MissingInit,
        Err(e) => BrokerError::StreamIo(e),
    };

    error!(error = %failure, "missing init message");
    let response = PublishResponse::error(BrokerError::MissingInit.to_string());
    send_response(responses, &response, "-").await;
    Err(failure)
}

/// Append Data messages until the stream ends, enqueueing batched acks.
async fn ingest<R: RequestStream>(
    requests: &mut R,
    local: &LocalPartition,
    session: &PublisherSession,
    queue: &mpsc::Sender<PublishResponse>,
    ack_interval: i64,
) -> BrokerResult<()> {
    let topic_label = local.topic().to_string();
    let mut since_ack: i64 = 0;

    loop {
        let message = match requests.recv().await {
            Ok(Some(PublishRequest::Data(message))) => message,
            Ok(Some(PublishRequest::Init(_))) => {
                warn!(session = %session.id(), "Ignoring repeated init");
                continue;
            }
            Ok(None) => {
                debug!(session = %session.id(), "Publisher closed the stream");
                return Ok(());
            }
            Err(e) => {
                if e.is_disconnect() {
                    info!(session = %session.id(), error = %e, "Publisher went away");
                } else {
                    warn!(session = %session.id(), error = %e, "Failed to receive publish request");
                }
                return Err(BrokerError::StreamIo(e));
            }
        };

        if let Err(e) = local.publish(&message).await {
            error!(session = %session.id(), error = %e, "Append failed, ending session");
            let response = PublishResponse::error(e.client_message(local.topic(), local.partition()));
            enqueue(queue, response, session.id()).await;
            return Err(e);
        }
        metrics::record_publish(&topic_label, message.size());

        let sequence = session.advance();
        since_ack += 1;
        if since_ack >= ack_interval {
            since_ack = 0;
            if enqueue(queue, PublishResponse::ack(sequence), session.id()).await {
                metrics::ACKS_SENT.inc();
            }
        }
    }
}

/// Sole writer of the response sink.
///
/// Queued responses take priority, so everything enqueued before the queue
/// closed is written before the task exits.
async fn run_outbound<S: ResponseSink>(
    mut sink: S,
    mut pending: mpsc::Receiver<PublishResponse>,
    session: Arc<PublisherSession>,
    stop: CancellationToken,
    heartbeat: Duration,
) {
    let mut ticker = interval_at(Instant::now() + heartbeat, heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stop_observed = false;

    loop {
        tokio::select! {
            biased;

            queued = pending.recv() => {
                let Some(mut response) = queued else {
                    break;
                };
                response.ack_sequence = response.ack_sequence.max(session.ack_sequence());
                send_response(&mut sink, &response, session.id()).await;
            }
            _ = stop.cancelled(), if !stop_observed => {
                stop_observed = true;
                info!(session = %session.id(), "Partition stopping, asking publisher to close");
                let response = PublishResponse::close(session.ack_sequence());
                send_response(&mut sink, &response, session.id()).await;
            }
            _ = ticker.tick() => {
                if session.is_stopping() {
                    break;
                }
                let response = PublishResponse::ack(session.ack_sequence());
                if send_response(&mut sink, &response, session.id()).await {
                    metrics::HEARTBEATS_SENT.inc();
                }
            }
        }
    }
    debug!(session = %session.id(), "Outbound pipeline finished");
}

/// Best-effort write. Failures are logged and counted, never propagated.
async fn send_response<S: ResponseSink + ?Sized>(
    sink: &mut S,
    response: &PublishResponse,
    session: &str,
) -> bool {
    match sink.send(response).await {
        Ok(()) => true,
        Err(e) => {
            metrics::RESPONSE_SEND_FAILURES.inc();
            let failure = BrokerError::SendFailed(e.to_string());
            warn!(session, error = %failure, "Failed to send response");
            false
        }
    }
}

async fn enqueue(
    queue: &mpsc::Sender<PublishResponse>,
    response: PublishResponse,
    session: &str,
) -> bool {
    match queue.send(response).await {
        Ok(()) => true,
        Err(_) => {
            metrics::RESPONSE_SEND_FAILURES.inc();
            warn!(session, "Response queue closed, dropping response");
            false
        }
    }
}

/// Tears a session down when dropped.
struct SessionGuard {
    partitions: Arc<PartitionManager>,
    local: Arc<LocalPartition>,
    session: Arc<PublisherSession>,
    outbound: Option<JoinHandle<()>>,
    outcome: &'static str,
}

impl SessionGuard {
    fn new(
        partitions: Arc<PartitionManager>,
        local: Arc<LocalPartition>,
        session: Arc<PublisherSession>,
    ) -> Self {
        Self {
            partitions,
            local,
            session,
            outbound: None,
            outcome: "cancelled",
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.session.set_stopping();
        // Still set only when the handler future was dropped mid-session.
        if let Some(outbound) = self.outbound.take() {
            outbound.abort();
        }
        let torn_down = self.partitions.detach_publisher(&self.local, &self.session);
        metrics::record_session_end(
            self.outcome,
            self.session.connected_at().elapsed().as_secs_f64(),
        );
        info!(
            topic = %self.local.topic(),
            partition = %self.local.partition(),
            session = %self.session.id(),
            outcome = self.outcome,
            acked = self.session.ack_sequence(),
            torn_down,
            "Publisher disconnected"
        );
    }
}
