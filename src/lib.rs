pub mod block;
pub mod constants;
pub mod event;
pub mod ledger;
pub mod pipeline;
pub mod receiver;
pub mod server;
pub mod snapshot;
pub mod staking;
pub mod store;
