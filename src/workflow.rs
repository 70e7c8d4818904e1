//! The two-stage reservation workflow: reserve priced options as a pending
//! shipment, then purchase, cancel, or void exactly once.
//!
//! External collaborators (address resolution, the carrier API) sit behind
//! traits so the state machine can be exercised without a network. Mutating
//! operations never persist partial state: the record is written only after
//! the external call it depends on has succeeded.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{
    Address, OperationOutcome, Parcel, PendingShipment, PurchasedLabel, RateOption, ShipmentDetail,
    ShipmentStatus,
};
use crate::infra::cache::{CachedPayload, ResultCache};
use crate::util::persistence::{PersistError, ShipmentStore};

/// TTL for carrier-side shipment detail lookups.
pub const DETAIL_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("order {0} not found or has no shipping address")]
    OrderNotFound(String),
    #[error("order lookup failed: {0}")]
    Lookup(String),
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("http request error: {0}")]
    Http(String),
    #[error("carrier api error: {0}")]
    Api(String),
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("could not resolve destination address: {0}")]
    AddressResolution(#[from] ResolveError),
    #[error("no rates available{}", .carrier_filter.as_deref().map(|c| format!(" from carrier \"{c}\"")).unwrap_or_default())]
    NoRatesAvailable { carrier_filter: Option<String> },
    #[error("shipment {0} not found")]
    ShipmentNotFound(String),
    #[error("shipment {shipment_id} was already purchased (tracking code {tracking_code})")]
    AlreadyPurchased {
        shipment_id: String,
        tracking_code: String,
    },
    #[error("label for shipment {0} has been voided; create a new shipment to buy again")]
    LabelVoided(String),
    #[error("rate {rate_id} not found on shipment {shipment_id}; valid rate ids: {available}")]
    RateNotFound {
        shipment_id: String,
        rate_id: String,
        available: String,
    },
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("failed to persist shipment state: {0}")]
    Store(#[from] PersistError),
}

/// A priced quote from the carrier: the shipment identifier it assigned plus
/// the options it returned. May carry zero rates.
#[derive(Clone, Debug)]
pub struct RateQuote {
    pub shipment_id: String,
    pub created_at: u64,
    pub rates: Vec<RateOption>,
}

#[derive(Clone, Debug)]
pub struct LabelReceipt {
    pub tracking_code: String,
    pub label_url: Option<String>,
    pub raw_status: Option<String>,
}

#[derive(Clone, Debug)]
pub struct RefundReceipt {
    pub status: String,
}

/// Looks up the destination address behind an external order reference.
#[async_trait]
pub trait AddressResolver: Send + Sync {
    async fn resolve(&self, order_ref: &str) -> Result<Address, ResolveError>;
}

/// The carrier API surface the workflow depends on.
#[async_trait]
pub trait CarrierGateway: Send + Sync {
    /// Price the shipment. Zero rates is a valid answer, not an error.
    async fn shop_rates(
        &self,
        to: &Address,
        from: &Address,
        parcel: &Parcel,
        carrier_hint: Option<&str>,
    ) -> Result<RateQuote, GatewayError>;

    async fn buy_label(&self, shipment_id: &str, rate_id: &str)
        -> Result<LabelReceipt, GatewayError>;

    async fn refund_label(&self, shipment_id: &str) -> Result<RefundReceipt, GatewayError>;

    async fn retrieve_shipment(&self, shipment_id: &str) -> Result<ShipmentDetail, GatewayError>;
}

#[derive(Clone, Debug, Default)]
pub struct CreateShipmentRequest {
    pub order_ref: Option<String>,
    pub to_address: Option<Address>,
    pub parcel: Parcel,
    pub carrier_filter: Option<String>,
}

pub struct ShippingWorkflow<R, G> {
    resolver: R,
    gateway: G,
    store: ShipmentStore,
    cache: ResultCache,
    origin: Address,
    home_country: String,
}

impl<R: AddressResolver, G: CarrierGateway> ShippingWorkflow<R, G> {
    pub fn new(
        resolver: R,
        gateway: G,
        store: ShipmentStore,
        cache: ResultCache,
        origin: Address,
        home_country: String,
    ) -> Self {
        Self {
            resolver,
            gateway,
            store,
            cache,
            origin,
            home_country,
        }
    }

    /// Reserve a rate quote: resolve the destination, shop rates, persist the
    /// record as `pending`. Nothing is written when no rates survive.
    pub async fn create_shipment(
        &self,
        request: CreateShipmentRequest,
    ) -> Result<PendingShipment, WorkflowError> {
        let CreateShipmentRequest {
            order_ref,
            to_address,
            parcel,
            carrier_filter,
        } = request;

        parcel.validate().map_err(WorkflowError::InvalidInput)?;

        let mut to = match (order_ref.as_deref(), to_address) {
            (Some(_), Some(_)) => {
                return Err(WorkflowError::InvalidInput(
                    "supply either an order reference or a destination address, not both"
                        .to_string(),
                ))
            }
            (None, None) => {
                return Err(WorkflowError::InvalidInput(
                    "an order reference or a destination address is required".to_string(),
                ))
            }
            (None, Some(address)) => {
                address.validate().map_err(WorkflowError::InvalidInput)?;
                address
            }
            (Some(reference), None) => self.resolver.resolve(reference).await?,
        };
        to.apply_home_country(&self.home_country);
        to.validate().map_err(WorkflowError::InvalidInput)?;

        let quote = self
            .gateway
            .shop_rates(&to, &self.origin, &parcel, carrier_filter.as_deref())
            .await?;

        let mut rates = quote.rates;
        if let Some(filter) = carrier_filter.as_deref() {
            rates.retain(|rate| rate.carrier.eq_ignore_ascii_case(filter));
        }
        if rates.is_empty() {
            return Err(WorkflowError::NoRatesAvailable { carrier_filter });
        }
        rates.sort_by(|a, b| a.price_value().total_cmp(&b.price_value()));

        let shipment = PendingShipment {
            id: quote.shipment_id,
            created_at: quote.created_at,
            order_ref,
            to_address: to,
            from_address: self.origin.clone(),
            parcel,
            rates,
            status: ShipmentStatus::Pending,
            tracking_code: None,
            label_url: None,
        };

        let mut state = self.store.load();
        state
            .shipments
            .insert(shipment.id.clone(), shipment.clone());
        self.store.save(&mut state)?;

        Ok(shipment)
    }

    /// Commit to one of the reserved rates. Not idempotent: a repeated call
    /// is a caller error, surfaced with the original tracking code.
    pub async fn buy_label(
        &self,
        shipment_id: &str,
        rate_id: &str,
    ) -> Result<PurchasedLabel, WorkflowError> {
        let mut state = self.store.load();
        let shipment = state
            .shipments
            .get(shipment_id)
            .ok_or_else(|| WorkflowError::ShipmentNotFound(shipment_id.to_string()))?;

        match shipment.status {
            ShipmentStatus::Purchased => {
                return Err(WorkflowError::AlreadyPurchased {
                    shipment_id: shipment_id.to_string(),
                    tracking_code: shipment
                        .tracking_code
                        .clone()
                        .unwrap_or_else(|| "unknown".to_string()),
                })
            }
            ShipmentStatus::Voided => {
                return Err(WorkflowError::LabelVoided(shipment_id.to_string()))
            }
            ShipmentStatus::Pending => {}
        }

        let rate = shipment
            .find_rate(rate_id)
            .cloned()
            .ok_or_else(|| WorkflowError::RateNotFound {
                shipment_id: shipment_id.to_string(),
                rate_id: rate_id.to_string(),
                available: shipment.rate_ids().join(", "),
            })?;

        let receipt = self.gateway.buy_label(shipment_id, rate_id).await?;
        if let Some(raw_status) = &receipt.raw_status {
            println!("[carrier] Purchase accepted with status {raw_status}");
        }

        // The record is updated only after the carrier accepted the purchase.
        let entry = state
            .shipments
            .get_mut(shipment_id)
            .ok_or_else(|| WorkflowError::ShipmentNotFound(shipment_id.to_string()))?;
        entry.status = ShipmentStatus::Purchased;
        entry.tracking_code = Some(receipt.tracking_code.clone());
        entry.label_url = receipt.label_url.clone();
        self.store.save(&mut state)?;

        Ok(PurchasedLabel {
            shipment_id: shipment_id.to_string(),
            tracking_code: receipt.tracking_code,
            label_url: receipt.label_url,
            carrier: rate.carrier,
            service: rate.service,
            price: rate.price,
            currency: rate.currency,
        })
    }

    /// Drop a reservation that was never purchased. Refusals (not found,
    /// already purchased) are routine outcomes, reported as values.
    pub fn cancel_shipment(&self, shipment_id: &str) -> Result<OperationOutcome, WorkflowError> {
        let mut state = self.store.load();
        match state.shipments.get(shipment_id) {
            None => Ok(OperationOutcome::failure(format!(
                "no shipment {shipment_id} found; nothing to cancel"
            ))),
            Some(shipment) if shipment.status == ShipmentStatus::Purchased => {
                Ok(OperationOutcome::failure(format!(
                    "shipment {shipment_id} was already purchased; use `void` to request a refund"
                )))
            }
            Some(shipment) if shipment.status == ShipmentStatus::Voided => {
                Ok(OperationOutcome::failure(format!(
                    "label for shipment {shipment_id} was voided; nothing to cancel"
                )))
            }
            Some(_) => {
                state.shipments.remove(shipment_id);
                self.store.save(&mut state)?;
                Ok(OperationOutcome::success(format!(
                    "cancelled shipment {shipment_id}; its rates are no longer reserved"
                )))
            }
        }
    }

    /// The carrier's current view of a shipment, through the read-through
    /// cache. Talks to the carrier, not the local store.
    pub async fn get_shipment(
        &self,
        shipment_id: &str,
        refresh: bool,
    ) -> Result<CachedPayload<ShipmentDetail>, WorkflowError> {
        let payload = self
            .cache
            .get_or_fetch(
                "shipment_detail",
                &[shipment_id],
                Some(DETAIL_CACHE_TTL),
                refresh,
                || async { self.gateway.retrieve_shipment(shipment_id).await },
            )
            .await?;
        Ok(payload)
    }

    /// Local records still awaiting a purchase decision, newest first.
    pub fn list_pending(&self) -> Vec<PendingShipment> {
        let state = self.store.load();
        let mut pending: Vec<PendingShipment> = state
            .shipments
            .into_values()
            .filter(|shipment| shipment.status == ShipmentStatus::Pending)
            .collect();
        pending.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        pending
    }

    /// The rate snapshot taken at creation. Never re-shops.
    pub fn get_rates(&self, shipment_id: &str) -> Result<Vec<RateOption>, WorkflowError> {
        let state = self.store.load();
        state
            .shipments
            .get(shipment_id)
            .map(|shipment| shipment.rates.clone())
            .ok_or_else(|| WorkflowError::ShipmentNotFound(shipment_id.to_string()))
    }

    /// Request a refund for a purchased label. Refund refusals are routine
    /// outcomes; only persistence failures are errors.
    pub async fn void_label(&self, shipment_id: &str) -> Result<OperationOutcome, WorkflowError> {
        match self.gateway.refund_label(shipment_id).await {
            Err(error) => Ok(OperationOutcome::failure(format!(
                "refund request for {shipment_id} failed: {error}"
            ))),
            Ok(receipt) => {
                let mut state = self.store.load();
                if let Some(shipment) = state.shipments.get_mut(shipment_id) {
                    shipment.status = ShipmentStatus::Voided;
                    self.store.save(&mut state)?;
                    Ok(OperationOutcome::success(format!(
                        "label for {shipment_id} voided (refund status: {})",
                        receipt.status
                    )))
                } else {
                    // The carrier accepted the refund; a lost local record
                    // does not turn that into a failure.
                    Ok(OperationOutcome::success(format!(
                        "refund for {shipment_id} submitted (status: {}); no local record to update",
                        receipt.status
                    )))
                }
            }
        }
    }
}
