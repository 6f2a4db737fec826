use crate::db_types::Order;

/// Published once the transaction that debited the wallet and stored the PAID order has committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderPaidEvent {
    pub order: Order,
}

impl OrderPaidEvent {
    pub fn new(order: Order) -> Self {
        Self { order }
    }
}
