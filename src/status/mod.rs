//! Connection status aggregation across subscriptions opened together

mod aggregator;

pub use aggregator::{
    AggregateMember, AggregatedStatus, ConnectionStatusAggregator, CONNECTION_LOST_MESSAGE,
};
