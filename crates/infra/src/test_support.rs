//! Shared fixture for the service tests.

use std::sync::Arc;
use std::time::Duration;

use stockroom_auth::{DirectoryAuthorizer, Principal, Role, RolePolicy};
use stockroom_core::{CategoryId, CounterpartyId, OrderId, PrincipalId, ProductId};
use stockroom_inventory::{NewProduct, Warehouse};
use stockroom_orders::NewOrderLine;

use crate::app::Stockroom;
use crate::catalog::CatalogService;
use crate::config::Config;
use crate::fulfillment::FulfillmentWorker;
use crate::jobs::{InMemoryJobStore, JobExecutor};
use crate::ledger::LedgerEngine;
use crate::notify::InMemorySink;
use crate::orders::{OrderDraft, OrderService};
use crate::store::{InMemoryStore, LedgerStore};

pub(crate) struct Harness {
    pub app: Stockroom,
    pub store: InMemoryStore,
    pub jobs: Arc<InMemoryJobStore>,
    pub sink: Arc<InMemorySink>,
    pub authorizer: Arc<DirectoryAuthorizer>,
    pub catalog: CatalogService,
    pub ledger: LedgerEngine,
    pub orders: OrderService,
    pub fulfillment: FulfillmentWorker,
    pub admin: PrincipalId,
    pub manager: PrincipalId,
    pub clerk: PrincipalId,
    pub salesperson: PrincipalId,
    pub warehouse: Warehouse,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_lock_timeout(Duration::from_secs(5)).await
    }

    /// Retries are immediate so `run_until_idle` drains them.
    pub async fn with_lock_timeout(lock_timeout: Duration) -> Self {
        let config = Config {
            lock_timeout_ms: lock_timeout.as_millis() as u64,
            job_base_delay_ms: 0,
            job_max_delay_ms: 0,
            alert_recipients: vec!["ops@example.com".to_string()],
            ..Config::default()
        };

        let authorizer = Arc::new(DirectoryAuthorizer::new(RolePolicy::standard()));
        let admin = PrincipalId::new();
        let manager = PrincipalId::new();
        let clerk = PrincipalId::new();
        let salesperson = PrincipalId::new();
        authorizer.register(Principal::new(admin).with_role(Role::ADMIN));
        authorizer.register(Principal::new(manager).with_role(Role::MANAGER));
        authorizer.register(Principal::new(clerk).with_role(Role::WAREHOUSE));
        authorizer.register(Principal::new(salesperson).with_role(Role::SALESPERSON));

        let store = InMemoryStore::new(config.lock_timeout());
        let jobs = InMemoryJobStore::arc();
        let app = Stockroom::new(Arc::new(store.clone()), jobs.clone(), authorizer.clone(), &config);

        let warehouse = app
            .catalog
            .register_warehouse("main", "Main warehouse", manager)
            .await
            .unwrap();

        Self {
            catalog: app.catalog.clone(),
            ledger: app.ledger.clone(),
            orders: app.orders.clone(),
            fulfillment: app.fulfillment.clone(),
            app,
            store,
            jobs,
            sink: InMemorySink::arc(),
            authorizer,
            admin,
            manager,
            clerk,
            salesperson,
            warehouse,
        }
    }

    /// Executor over the harness queue with every handler registered.
    pub fn executor(&self) -> JobExecutor<Arc<InMemoryJobStore>> {
        let mut executor = JobExecutor::new(self.jobs.clone());
        self.app.register_handlers(&mut executor, self.sink.clone());
        executor
    }

    pub async fn product(&self, sku: &str, on_hand: i64, reorder_level: i64) -> ProductId {
        let product = self
            .catalog
            .create_product(
                NewProduct {
                    sku: sku.to_string(),
                    name: format!("Product {sku}"),
                    category_id: CategoryId::new(),
                    price: 100,
                    reorder_level: Some(reorder_level),
                },
                self.manager,
            )
            .await
            .unwrap();
        if on_hand > 0 {
            self.ledger
                .increase(product.id(), self.warehouse.id, on_hand, self.manager)
                .await
                .unwrap();
        }
        product.id()
    }

    pub async fn quantity(&self, product_id: ProductId) -> i64 {
        self.store
            .product(product_id)
            .await
            .unwrap()
            .unwrap()
            .quantity()
    }

    pub async fn purchase_order(&self, lines: &[(ProductId, i64)]) -> OrderId {
        self.orders
            .create_purchase_order(CounterpartyId::new(), None, self.draft(lines), self.manager)
            .await
            .unwrap()
            .id()
    }

    pub async fn sale_order(&self, lines: &[(ProductId, i64)]) -> OrderId {
        self.orders
            .create_sale_order(CounterpartyId::new(), self.draft(lines), self.manager)
            .await
            .unwrap()
            .id()
    }

    fn draft(&self, lines: &[(ProductId, i64)]) -> OrderDraft {
        OrderDraft::new(
            self.warehouse.id,
            lines
                .iter()
                .map(|&(product_id, quantity)| NewOrderLine::new(product_id, quantity, 100))
                .collect(),
        )
    }
}
