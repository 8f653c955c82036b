//! Per-connection driver.
//!
//! One [`Connection`] runs as one task and processes its peer's messages
//! strictly in arrival order. It owns the framed stream (codec, cipher and
//! any pending header), the handshake and keepalive state, and, once the
//! peer is authenticated, the [`Session`] shared with the world.
//!
//! The loop selects between two sources:
//! - decoded frames from the peer, routed through the [`Dispatcher`]
//! - packets the world queued on the session's outbound handle
//!
//! Any fatal error ends the loop; the session, if registered, is then
//! unregistered and the stream dropped.

use crate::core::codec::WorldCodec;
use crate::core::packet::{ClientPacket, ServerPacket};
use crate::error::{ProtocolError, Result};
use crate::protocol::dispatcher::{disposition_for, Disposition, Dispatcher, InlineHandler, Route};
use crate::protocol::handshake::{
    auth_response_packet, greeting_packet, AuthGrant, AuthVerdict, ServerHandshake,
};
use crate::protocol::keepalive::{
    pong_packet, KeepaliveMonitor, KickReason, PingRequest, PingVerdict,
};
use crate::protocol::session::{
    enqueue, inbound_queue, InboundSender, OutboundReceiver, OutboundSender, Session,
};
use crate::service::registry::{AccountStore, LoginRecord, LoginSource, WorldRegistry};
use crate::utils::metrics::RealmMetrics;
use crate::utils::time::current_timestamp_secs;
use crate::utils::timeout::with_timeout_error;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, instrument, warn};

/// Services shared by every connection.
#[derive(Clone)]
pub struct ConnectionContext {
    pub accounts: Arc<dyn AccountStore>,
    pub world: Arc<dyn WorldRegistry>,
    pub dispatcher: Dispatcher,
    pub metrics: Arc<RealmMetrics>,
    /// Bound on each account store and world call.
    pub store_timeout: Duration,
}

impl ConnectionContext {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        world: Arc<dyn WorldRegistry>,
        metrics: Arc<RealmMetrics>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            accounts,
            world,
            dispatcher: Dispatcher::new(),
            metrics,
            store_timeout,
        }
    }
}

pub struct Connection<S> {
    framed: Framed<S, WorldCodec>,
    peer: SocketAddr,
    ctx: ConnectionContext,
    handshake: ServerHandshake,
    keepalive: KeepaliveMonitor,
    session: Option<Arc<Session>>,
    inbound: Option<InboundSender>,
    outbound_tx: OutboundSender,
    outbound_rx: OutboundReceiver,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, peer: SocketAddr, ctx: ConnectionContext) -> Self {
        Self::with_handshake(stream, peer, ctx, ServerHandshake::new())
    }

    /// Use a prepared handshake, e.g. one with a fixed server seed.
    pub fn with_handshake(
        stream: S,
        peer: SocketAddr,
        ctx: ConnectionContext,
        handshake: ServerHandshake,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            framed: Framed::new(stream, WorldCodec::new()),
            peer,
            ctx,
            handshake,
            keepalive: KeepaliveMonitor::new(),
            session: None,
            inbound: None,
            outbound_tx,
            outbound_rx,
        }
    }

    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    /// Drive the connection until the peer leaves or an error closes it.
    #[instrument(skip_all, fields(peer = %self.peer))]
    pub async fn run(mut self) -> Result<()> {
        self.ctx.metrics.connection_established();
        let result = self.drive().await;

        match &result {
            Ok(()) => debug!("Connection closed by peer"),
            Err(ProtocolError::AuthRejected(reason)) => {
                info!(%reason, "Connection closed after auth rejection")
            }
            Err(e) if e.is_protocol_violation() => {
                warn!(error = %e, "Connection closed for protocol violation")
            }
            Err(e) => warn!(error = %e, "Connection closed"),
        }

        self.shutdown().await;
        self.ctx.metrics.connection_closed();
        result
    }

    async fn drive(&mut self) -> Result<()> {
        self.write(greeting_packet(), true).await?;

        loop {
            tokio::select! {
                frame = self.framed.next() => {
                    let packet = match frame {
                        None => return Ok(()),
                        Some(Err(e)) => {
                            if matches!(e, ProtocolError::InvalidFrameSize { .. }) {
                                self.ctx.metrics.framing_error();
                                error!(error = %e, "Client sent malformed packet size");
                            }
                            return Err(e);
                        }
                        Some(Ok(packet)) => packet,
                    };
                    self.ctx.metrics.message_received(packet.body().len() as u64);
                    self.process(packet).await?;
                    self.framed.flush().await?;
                }
                Some(outbound) = self.outbound_rx.recv() => {
                    self.write(outbound.packet, outbound.immediate).await?;
                    // batch whatever else is already queued
                    while let Ok(next) = self.outbound_rx.try_recv() {
                        self.write(next.packet, next.immediate).await?;
                    }
                    self.framed.flush().await?;
                }
            }
        }
    }

    /// Route one decoded message and apply the dispatcher's verdict on errors.
    async fn process(&mut self, packet: ClientPacket) -> Result<()> {
        let authenticated = self.session.is_some();
        let route = match self.ctx.dispatcher.route(packet.opcode(), authenticated) {
            Ok(route) => route,
            Err(e) => {
                if e.is_protocol_violation() {
                    self.ctx.metrics.protocol_violation();
                }
                return Err(e);
            }
        };

        let result = match route {
            Route::QueueForSimulation => self.queue(packet.clone()),
            Route::Inline(handler) => self.handle_inline(handler, &packet).await,
        };

        let Err(err) = result else {
            if let Some(session) = &self.session {
                session.touch();
            }
            return Ok(());
        };
        if matches!(err, ProtocolError::MalformedBody { .. }) {
            self.ctx.metrics.malformed_packet();
        }
        if err.is_protocol_violation() {
            self.ctx.metrics.protocol_violation();
        }

        let settings = self.ctx.world.settings();
        let account_id = self.session.as_ref().map(|s| s.account_id());
        match disposition_for(&err, &packet, account_id, &settings) {
            Disposition::Continue => Ok(()),
            Disposition::Close => Err(err),
        }
    }

    async fn handle_inline(&mut self, handler: InlineHandler, packet: &ClientPacket) -> Result<()> {
        match handler {
            InlineHandler::ConnectionGreeting => {
                let challenge = self.handshake.on_connection_greeting(packet)?;
                self.write(challenge, false).await
            }
            InlineHandler::AuthSession => self.handle_auth_session(packet).await,
            InlineHandler::Ping => self.handle_ping(packet).await,
            InlineHandler::KeepAlive => {
                debug!(size = packet.body().len(), "CMSG_KEEP_ALIVE");
                Ok(())
            }
        }
    }

    async fn handle_auth_session(&mut self, packet: &ClientPacket) -> Result<()> {
        self.ctx.metrics.handshake_attempt();
        let settings = self.ctx.world.settings();

        let verdict = self
            .handshake
            .on_auth_session(
                packet,
                self.peer.ip(),
                self.ctx.accounts.as_ref(),
                &settings,
                self.ctx.store_timeout,
            )
            .await?;

        match verdict {
            AuthVerdict::Rejected(reason) => {
                self.ctx.metrics.handshake_rejected(reason);
                let response = auth_response_packet(reason.response_code());
                self.write(response, true).await?;
                Err(ProtocolError::AuthRejected(reason))
            }
            AuthVerdict::Accepted(grant) => self.complete_login(*grant).await,
        }
    }

    async fn complete_login(&mut self, grant: AuthGrant) -> Result<()> {
        let AuthGrant {
            session: session_grant,
            session_key,
            addon_data,
            build,
        } = grant;
        let address = self.peer.ip();
        let timeout = self.ctx.store_timeout;

        let record = LoginRecord {
            account_id: session_grant.account_id,
            address,
            timestamp_secs: current_timestamp_secs()?,
            source: LoginSource::WorldServer,
        };
        let accounts = Arc::clone(&self.ctx.accounts);
        tokio::spawn(async move {
            let account_id = record.account_id;
            if let Err(e) = with_timeout_error(accounts.record_login(record), timeout).await {
                warn!(account_id, error = %e, "Failed to record login");
            }
        });

        let session = Arc::new(Session::new(session_grant, address, self.outbound_tx.clone()));
        self.framed.codec_mut().cipher_mut().rekey(&session_key)?;

        let world = Arc::clone(&self.ctx.world);
        with_timeout_error(world.load_session_data(&session, addon_data), timeout).await?;

        let (inbound_tx, inbound_rx) = inbound_queue();
        with_timeout_error(world.register(Arc::clone(&session), inbound_rx), timeout).await?;

        info!(
            account_id = session.account_id(),
            account = %session.account_name(),
            build,
            security = ?session.security(),
            expansion = session.expansion(),
            locale = session.locale().code(),
            "Client authenticated"
        );
        self.ctx.metrics.handshake_success();
        self.session = Some(session);
        self.inbound = Some(inbound_tx);
        Ok(())
    }

    async fn handle_ping(&mut self, packet: &ClientPacket) -> Result<()> {
        let request = PingRequest::parse(packet)?;
        let settings = self.ctx.world.settings();
        let security = self.session.as_ref().map(|s| s.security());

        match self
            .keepalive
            .on_ping(Instant::now(), security, settings.max_overspeed_pings)
        {
            PingVerdict::Kick(KickReason::Overspeed { count }) => {
                self.ctx.metrics.overspeed_kick();
                error!(count, "Player kicked for overspeeded pings");
                Err(ProtocolError::OverspeedPings { count })
            }
            PingVerdict::Kick(KickReason::NotAuthenticated) => {
                error!("Peer sent CMSG_PING but is not authenticated");
                Err(ProtocolError::PingBeforeAuth)
            }
            PingVerdict::Accept => {
                if let Some(session) = &self.session {
                    session.set_latency_ms(request.latency);
                }
                self.write(pong_packet(request.ping), true).await
            }
        }
    }

    fn queue(&self, packet: ClientPacket) -> Result<()> {
        let opcode = packet.opcode();
        let inbound = self
            .inbound
            .as_ref()
            .ok_or(ProtocolError::NotAuthenticated { opcode })?;
        enqueue(inbound, packet)?;
        self.ctx.metrics.message_queued();
        Ok(())
    }

    async fn write(&mut self, packet: ServerPacket, immediate: bool) -> Result<()> {
        let len = packet.len() as u64;
        self.framed.feed(packet).await?;
        self.ctx.metrics.message_sent(len);
        if immediate {
            self.framed.flush().await?;
        }
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.inbound = None;
        if let Some(session) = self.session.take() {
            let account_id = session.account_id();
            let world = Arc::clone(&self.ctx.world);
            if let Err(e) =
                with_timeout_error(world.unregister(&session), self.ctx.store_timeout).await
            {
                warn!(account_id, error = %e, "Failed to unregister session");
            }
        }
    }
}
