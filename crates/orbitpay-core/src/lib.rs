pub mod cancellation;
pub mod clock;
pub mod common;
pub mod config;
pub mod engine;
pub mod error;
pub mod error_sink;
pub mod models;
pub mod provider;
pub mod registry;
pub mod repository;

pub use cancellation::CancellationToken;
pub use clock::{Clock, SystemClock, TestClock};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{BatchItemError, Error, Result, TransitionError};
pub use error_sink::{ErrorSink, VecErrorSink};
pub use models::{
    Product, ProductGroup, ProductId, ProductType, Subscription, SubscriptionId,
    SubscriptionStatus, Transaction, TransactionId, TransactionStatus, TransactionType, User,
};
pub use provider::{
    AdapterCapabilities, OriginalTxContext, PrepareContext, PreparedPurchase,
    PreparedSubscription, ProviderAdapter, ProviderEvent, RechargeOutcome,
    SubscriptionStatusOutcome, TransactionStatusOutcome,
};
pub use registry::Registry;
pub use repository::{ActionRecord, InMemoryRepository, Repository, SubscriptionPatch, TransactionPatch};

/// Current version of orbitpay-core
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
