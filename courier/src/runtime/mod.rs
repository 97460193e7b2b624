/// Broker facade tying store, queue and reconciler together.
pub mod broker;
/// Builder validating broker dependencies.
pub mod builder;
/// Graceful shutdown signaling.
pub mod shutdown;

pub use broker::Broker;
pub use builder::BrokerBuilder;
pub use shutdown::ShutdownToken;
