pub mod api;
pub mod catalog;
pub mod config;
pub mod entitlements;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod routes;
pub mod settlement;
pub mod store;
pub mod subscriptions;
pub mod usage;

pub use catalog::{effective_limit, suggested_upgrade, BillingSku, Limit, SkuKind};
pub use entitlements::{EntitlementResolver, EntitlementSummary};
pub use error::{BillingError, BillingResult, PlanLimitDetail};
pub use settlement::{BillingEvent, SettlementOutcome, SettlementService};
pub use store::{DocumentStore, MemoryStore, SharedStore};
pub use subscriptions::{SubscriptionRecord, SubscriptionStatus, SubscriptionStore};
pub use usage::{UsageCharge, UsageGuard, UsageSnapshot};
