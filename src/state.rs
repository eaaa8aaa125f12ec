use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::{DbPool, OrmConn, orm_from_pool},
    repository::SeaOrmOrderRepository,
    services::{
        cart_service::SeaOrmCartReader, order_service::OrderPlacementService,
        payment_gateway::StripeGateway,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub orm: OrmConn,
    pub config: Arc<AppConfig>,
    pub placement: Arc<OrderPlacementService>,
}

impl AppState {
    /// Wires the production collaborators: Postgres-backed orders and cart, Stripe gateway.
    pub fn from_config(config: AppConfig, pool: DbPool) -> anyhow::Result<Self> {
        let orm = orm_from_pool(pool.clone());
        let payment = config.payment.clone();
        let gateway = StripeGateway::new(payment.stripe_api_base.clone(), payment.gateway_timeout)?;
        let placement = OrderPlacementService::new(
            Arc::new(SeaOrmOrderRepository::new(orm.clone())),
            Arc::new(SeaOrmCartReader::new(orm.clone(), payment.currency.clone())),
            Arc::new(gateway),
            payment,
        );
        Ok(Self::new(config, pool, orm, placement))
    }

    pub fn new(
        config: AppConfig,
        pool: DbPool,
        orm: OrmConn,
        placement: OrderPlacementService,
    ) -> Self {
        Self {
            pool,
            orm,
            config: Arc::new(config),
            placement: Arc::new(placement),
        }
    }
}
