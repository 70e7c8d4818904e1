//! Client for the in-house order service that knows where an order ships to.
//!
//! The workflow only needs one thing from it: a destination address for an
//! order reference, or a clear not-found.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;

use crate::domain::Address;
use crate::workflow::{AddressResolver, ResolveError};

const USER_AGENT: &str = concat!("rate-keeper/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct OrderServiceClient {
    http: Client,
    base_url: Url,
}

impl OrderServiceClient {
    pub fn new(base_url: &str) -> Result<Self, ResolveError> {
        let base_url =
            Url::parse(base_url).map_err(|e| ResolveError::Lookup(format!("invalid URL: {e}")))?;
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ResolveError::Lookup(e.to_string()))?;
        Ok(Self { http, base_url })
    }
}

#[async_trait]
impl AddressResolver for OrderServiceClient {
    async fn resolve(&self, order_ref: &str) -> Result<Address, ResolveError> {
        let url = self
            .base_url
            .join(&format!("orders/{order_ref}"))
            .map_err(|e| ResolveError::Lookup(format!("invalid URL: {e}")))?;

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ResolveError::Lookup(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ResolveError::OrderNotFound(order_ref.to_string()));
        }
        let response = response
            .error_for_status()
            .map_err(|e| ResolveError::Lookup(e.to_string()))?;

        let order: OrderDto = response
            .json()
            .await
            .map_err(|e| ResolveError::Lookup(format!("failed to decode order: {e}")))?;

        order
            .shipping_address
            .map(Address::from)
            .ok_or_else(|| ResolveError::OrderNotFound(order_ref.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct OrderDto {
    #[allow(dead_code)]
    id: String,
    #[serde(default)]
    shipping_address: Option<OrderAddressDto>,
}

/// The order service spells address fields its own way.
#[derive(Debug, Deserialize)]
struct OrderAddressDto {
    #[serde(default)]
    recipient: Option<String>,
    #[serde(default)]
    company: Option<String>,
    line1: String,
    #[serde(default)]
    line2: Option<String>,
    city: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default, alias = "postal_code")]
    postcode: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

impl From<OrderAddressDto> for Address {
    fn from(dto: OrderAddressDto) -> Self {
        Self {
            name: dto.recipient,
            company: dto.company,
            street1: dto.line1,
            street2: dto.line2,
            city: dto.city,
            state: dto.region,
            postal_code: dto.postcode,
            country: dto.country,
            phone: dto.phone,
            email: dto.email,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_address_maps_onto_the_domain_shape() {
        let dto: OrderDto = serde_json::from_str(
            r#"{
                "id": "order-42",
                "shipping_address": {
                    "recipient": "A. Customer",
                    "line1": "48 Leicester Square",
                    "city": "London",
                    "region": null,
                    "postcode": "WC2H 7LU",
                    "country": "GB"
                }
            }"#,
        )
        .unwrap();

        let address = Address::from(dto.shipping_address.unwrap());
        assert_eq!(address.name.as_deref(), Some("A. Customer"));
        assert_eq!(address.street1, "48 Leicester Square");
        assert_eq!(address.postal_code, "WC2H 7LU");
        assert!(address.validate().is_ok());
    }

    #[test]
    fn order_without_address_deserializes_to_none() {
        let dto: OrderDto = serde_json::from_str(r#"{"id": "order-7"}"#).unwrap();
        assert!(dto.shipping_address.is_none());
    }
}
