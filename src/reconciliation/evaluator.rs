use rust_decimal::Decimal;
use serde::Serialize;

use crate::ledger::models::{Observation, PendingPayment};

/// What a fresh observation means for an awaiting payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Amount and confirmations both meet the thresholds
    Confirm,
    /// Record the observation, keep waiting
    Awaiting,
    /// Provider reported less than we already persisted and the reading
    /// does not confirm on its own
    Regressed { persisted: Decimal, observed: Decimal },
}

/// Decide the transition for one payment.
///
/// Both conditions are required: a partial payment never confirms no matter
/// how deep it is buried, and a full payment waits for the threshold. They
/// are judged on the fresh reading alone, so a mempool top-up that was
/// recorded and later dropped cannot hold back a confirmed payment.
pub fn evaluate(
    payment: &PendingPayment,
    observation: &Observation,
    required_confirmations: u32,
) -> Decision {
    let amount_ok = observation.received_amount >= payment.expected_amount;
    let depth_ok = observation.confirmations >= required_confirmations;

    if amount_ok && depth_ok {
        Decision::Confirm
    } else if observation.received_amount < payment.received_amount {
        Decision::Regressed {
            persisted: payment.received_amount,
            observed: observation.received_amount,
        }
    } else {
        Decision::Awaiting
    }
}
