//! Payment gateway boundary.
//!
//! The commitment lifecycle only ever talks to [`PaymentGateway`]; a real
//! deployment plugs in a card processor client, tests use [`MockGateway`].

#![deny(unsafe_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use stride_types::UserId;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("gateway rejected the request: {0}")]
    Rejected(String),

    #[error("charge not found: {0}")]
    ChargeNotFound(String),

    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

/// A charge held by the gateway, refundable until captured out.
#[derive(Clone, Debug)]
pub struct Charge {
    pub id: String,
    pub customer_ref: String,
    pub amount_cents: i64,
    pub confirmed: bool,
}

/// A refund issued against an earlier charge.
#[derive(Clone, Debug)]
pub struct Refund {
    pub id: String,
    pub charge_id: String,
    pub amount_cents: i64,
}

/// External payment processor operations the platform needs.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Resolve the gateway-side customer for a user, creating one if absent.
    async fn get_or_create_customer(&self, user_id: &UserId) -> Result<String, PaymentError>;

    /// Create a charge against the customer's stored payment method.
    async fn create_charge(
        &self,
        customer_ref: &str,
        amount_cents: i64,
    ) -> Result<Charge, PaymentError>;

    /// Confirm a previously created charge.
    async fn confirm_charge(&self, charge_id: &str) -> Result<Charge, PaymentError>;

    /// Refund a charge in full.
    async fn create_refund(&self, charge_id: &str) -> Result<Refund, PaymentError>;
}

/// Scriptable in-memory gateway.
///
/// Behaves like a processor that always approves, until a test arms
/// [`MockGateway::fail_next_refund`] or [`MockGateway::fail_next_charge`] to
/// exercise the error paths.
#[derive(Default)]
pub struct MockGateway {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    customers: HashMap<UserId, String>,
    charges: HashMap<String, Charge>,
    refunds: Vec<Refund>,
    fail_next_charge: bool,
    fail_next_refund: bool,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `create_charge` call fail.
    pub fn fail_next_charge(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_next_charge = true;
        }
    }

    /// Make the next `create_refund` call fail.
    pub fn fail_next_refund(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_next_refund = true;
        }
    }

    /// Refunds issued so far, oldest first.
    pub fn refunds(&self) -> Vec<Refund> {
        self.state
            .lock()
            .map(|state| state.refunds.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MockState>, PaymentError> {
        self.state
            .lock()
            .map_err(|_| PaymentError::Unavailable("mock gateway lock poisoned".to_string()))
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn get_or_create_customer(&self, user_id: &UserId) -> Result<String, PaymentError> {
        let mut state = self.lock()?;
        let customer_ref = state
            .customers
            .entry(*user_id)
            .or_insert_with(|| format!("cus_{}", Uuid::new_v4().simple()))
            .clone();
        Ok(customer_ref)
    }

    async fn create_charge(
        &self,
        customer_ref: &str,
        amount_cents: i64,
    ) -> Result<Charge, PaymentError> {
        let mut state = self.lock()?;
        if state.fail_next_charge {
            state.fail_next_charge = false;
            return Err(PaymentError::Rejected("card declined".to_string()));
        }
        if amount_cents <= 0 {
            return Err(PaymentError::Rejected(format!(
                "charge amount must be positive, got {amount_cents}"
            )));
        }
        let charge = Charge {
            id: format!("ch_{}", Uuid::new_v4().simple()),
            customer_ref: customer_ref.to_string(),
            amount_cents,
            confirmed: false,
        };
        state.charges.insert(charge.id.clone(), charge.clone());
        info!(charge_id = %charge.id, amount_cents, "mock charge created");
        Ok(charge)
    }

    async fn confirm_charge(&self, charge_id: &str) -> Result<Charge, PaymentError> {
        let mut state = self.lock()?;
        let charge = state
            .charges
            .get_mut(charge_id)
            .ok_or_else(|| PaymentError::ChargeNotFound(charge_id.to_string()))?;
        charge.confirmed = true;
        Ok(charge.clone())
    }

    async fn create_refund(&self, charge_id: &str) -> Result<Refund, PaymentError> {
        let mut state = self.lock()?;
        if state.fail_next_refund {
            state.fail_next_refund = false;
            return Err(PaymentError::Unavailable("refund endpoint timed out".to_string()));
        }
        let amount_cents = state
            .charges
            .get(charge_id)
            .ok_or_else(|| PaymentError::ChargeNotFound(charge_id.to_string()))?
            .amount_cents;
        let refund = Refund {
            id: format!("re_{}", Uuid::new_v4().simple()),
            charge_id: charge_id.to_string(),
            amount_cents,
        };
        state.refunds.push(refund.clone());
        info!(refund_id = %refund.id, charge_id, amount_cents, "mock refund created");
        Ok(refund)
    }
}
