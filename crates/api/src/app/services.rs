use std::{convert::Infallible, io, sync::Arc};

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use tokio::runtime::Handle;
use tokio_stream::{Stream, StreamExt};

use stockledger_auth::Principal;
use stockledger_core::LedgerResult;
use stockledger_events::InMemoryEventBus;
use stockledger_infra::{
    AssignmentRegistry, LedgerConfig, StockLedger,
    ledger_store::LedgerStore,
    notifications::{ClientHub, NotificationDispatcher},
    workers::{EventWorker, WorkerHandle},
};
use stockledger_inventory::MutationEvent;

pub type MutationBus = Arc<InMemoryEventBus<MutationEvent>>;

/// Everything a request handler can reach.
///
/// Built once at startup; handlers get it through an `Extension<Arc<AppServices>>`.
pub struct AppServices {
    pub config: LedgerConfig,
    pub store: Arc<dyn LedgerStore>,
    pub ledger: StockLedger<dyn LedgerStore, MutationBus>,
    pub registry: Arc<AssignmentRegistry<dyn LedgerStore>>,
    pub hub: Arc<ClientHub>,
    pub dispatcher: Arc<NotificationDispatcher<dyn LedgerStore, ClientHub>>,
    bus: MutationBus,
}

impl AppServices {
    /// Wire the services around `store` and load the assignment cache.
    ///
    /// Must run inside a tokio runtime; the dispatcher keeps its handle.
    pub async fn build(config: LedgerConfig, store: Arc<dyn LedgerStore>) -> LedgerResult<Self> {
        let bus: MutationBus = Arc::new(InMemoryEventBus::new());
        let ledger = StockLedger::new(Arc::clone(&store), Arc::clone(&bus))
            .with_max_conflict_retries(config.max_conflict_retries);
        let registry = Arc::new(AssignmentRegistry::load(Arc::clone(&store)).await?);
        let hub = ClientHub::new(config.client_channel_capacity);
        let dispatcher = Arc::new(NotificationDispatcher::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&hub),
            config.alert_policy,
            Handle::current(),
        ));

        Ok(Self {
            config,
            store,
            ledger,
            registry,
            hub,
            dispatcher,
            bus,
        })
    }

    /// Start the background thread that turns committed mutations into alerts.
    pub fn spawn_notification_worker(&self) -> io::Result<WorkerHandle> {
        EventWorker::spawn_notifications(&self.bus, Arc::clone(&self.dispatcher))
    }

    /// Register `principal` with the hub and expose its notifications as SSE.
    ///
    /// The first event (`ready`) confirms the registration; the connection is
    /// unregistered when the client goes away and the stream is dropped.
    pub fn notification_sse_stream(
        &self,
        principal: Principal,
    ) -> LedgerResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>> + use<>>> {
        let client = self.hub.register(principal.user_id, principal.role)?;

        let ready = SseEvent::default()
            .event("ready")
            .data(client.connection().connection_id.to_string());

        let notifications = client.filter_map(|notification| {
            match SseEvent::default().event(notification.topic()).json_data(&notification) {
                Ok(event) => Some(Ok::<_, Infallible>(event)),
                Err(err) => {
                    tracing::warn!(notification_id = %notification.id(), error = %err, "notification not serializable");
                    None
                }
            }
        });

        let stream = tokio_stream::once(Ok::<_, Infallible>(ready)).chain(notifications);
        Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(self.config.sse_keepalive)))
    }
}
