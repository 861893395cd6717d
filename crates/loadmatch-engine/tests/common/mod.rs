//! Shared harness for the engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use loadmatch_engine::{
    ManualClock, Marketplace, NotificationSink, OfferTerms, RecordingSink, RequestContext,
};
use loadmatch_store::InMemoryLedgerStore;
use loadmatch_types::{
    Actor, BackpressureConfig, EngineConfig, Offer, Shipment, ShipmentDetails, ShipmentStatus,
    UserId,
};
use rust_decimal::Decimal;

pub type Market = Marketplace<InMemoryLedgerStore>;

/// Route test logs through the test writer. `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("loadmatch_engine=debug,loadmatch_ingress=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub struct Harness {
    pub market: Arc<Market>,
    pub sink: Arc<RecordingSink>,
    pub clock: Arc<ManualClock>,
    pub shipper: Actor,
    pub admin: Actor,
}

/// Marketplace with default economics and no throttling.
pub fn harness() -> Harness {
    harness_with(EngineConfig {
        backpressure: BackpressureConfig::disabled(),
        ..EngineConfig::default()
    })
}

pub fn harness_with(config: EngineConfig) -> Harness {
    init_tracing();
    let sink = Arc::new(RecordingSink::new());
    let clock = Arc::new(ManualClock::starting_at(Utc::now()));
    let market = Marketplace::new(
        InMemoryLedgerStore::new(),
        config,
        sink.clone() as Arc<dyn NotificationSink>,
    )
    .expect("valid config")
    .with_clock(clock.clone());
    Harness {
        market: Arc::new(market),
        sink,
        clock,
        shipper: Actor::shipper(UserId::new()),
        admin: Actor::admin(UserId::new()),
    }
}

pub fn dec(units: i64) -> Decimal {
    Decimal::new(units, 0)
}

pub fn ctx(actor: Actor) -> RequestContext {
    RequestContext::local(actor)
}

pub fn carrier() -> Actor {
    Actor::carrier(UserId::new())
}

pub fn details(price: Option<i64>) -> ShipmentDetails {
    ShipmentDetails {
        pickup_address: "Istanbul, Ambarli Port".to_string(),
        delivery_address: "Kayseri, OSB".to_string(),
        cargo_description: "18 pallets of textiles".to_string(),
        price: price.map(dec),
    }
}

impl Harness {
    pub async fn open_shipment(&self) -> Shipment {
        self.market
            .create_shipment(&ctx(self.shipper), details(None))
            .await
            .expect("create shipment")
            .body
    }

    pub async fn bid(&self, carrier: Actor, shipment: &Shipment, price: i64) -> Offer {
        self.market
            .submit_offer(&ctx(carrier), shipment.id, OfferTerms::new(dec(price), None))
            .await
            .expect("submit offer")
            .body
    }

    /// Open a shipment, take one bid at `price` and accept it.
    pub async fn accepted(&self, carrier: Actor, price: i64) -> Shipment {
        let shipment = self.open_shipment().await;
        let offer = self.bid(carrier, &shipment, price).await;
        self.market
            .accept_offer(&ctx(self.shipper), offer.id)
            .await
            .expect("accept offer")
            .body
            .shipment
    }

    /// Drive an accepted shipment all the way to `completed`.
    pub async fn complete(&self, carrier: Actor, shipment: &Shipment) -> Shipment {
        let driver = UserId::new();
        self.market
            .assign_driver(&ctx(carrier), shipment.id, driver)
            .await
            .expect("assign driver");
        for target in [
            ShipmentStatus::InTransit,
            ShipmentStatus::Delivered,
            ShipmentStatus::Completed,
        ] {
            self.market
                .update_shipment_status(&ctx(carrier), shipment.id, target)
                .await
                .expect("status update");
        }
        self.market.shipment(shipment.id).expect("shipment exists")
    }
}
