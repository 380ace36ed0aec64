pub mod catalog;
pub mod postgres;

pub use catalog::{
    AppliedThresholdRepository, InMemoryCatalog, InMemoryInvoiceLedger, InMemoryThresholdStore,
    InvoiceRepository, MetricRepository, PlanRepository, ProgressiveInvoice,
    SubscriptionRepository, ThresholdRepository,
};
pub use postgres::PostgresEventStore;
