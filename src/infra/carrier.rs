//! Thin asynchronous client for the carrier shipping API.
//!
//! - Creates shipments (which prices them), buys labels, requests refunds,
//!   and retrieves the carrier's live shipment view.
//! - Wire shapes stay in private DTO structs; domain types never see them.
//! - Parcel units convert to the carrier's ounces/inches exactly here.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::domain::units::{
    centimeters_to_inches, inches_to_centimeters, kilograms_to_ounces, ounces_to_kilograms,
};
use crate::domain::{Address, Parcel, RateOption, ShipmentDetail};
use crate::util::unix_now;
use crate::workflow::{CarrierGateway, GatewayError, LabelReceipt, RateQuote, RefundReceipt};

const USER_AGENT: &str = concat!("rate-keeper/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

impl From<reqwest::Error> for GatewayError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            GatewayError::Http(format!("request timed out: {error}"))
        } else {
            GatewayError::Http(error.to_string())
        }
    }
}

impl From<url::ParseError> for GatewayError {
    fn from(error: url::ParseError) -> Self {
        GatewayError::InvalidUrl(error.to_string())
    }
}

#[derive(Clone)]
pub struct CarrierClient {
    http: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl CarrierClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, GatewayError> {
        let base_url = Url::parse(base_url)?;
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    fn url(&self, path: &str) -> Result<Url, GatewayError> {
        self.base_url.join(path).map_err(Into::into)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.basic_auth(key, None::<&str>),
            None => builder,
        }
    }

    async fn fetch_json<T>(&self, builder: reqwest::RequestBuilder) -> Result<T, GatewayError>
    where
        T: DeserializeOwned,
    {
        let response = self.authorize(builder).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&body) {
                return Err(GatewayError::Api(envelope.error.message));
            }
            return Err(GatewayError::Api(format!("HTTP {status}")));
        }
        response.json::<T>().await.map_err(Into::into)
    }
}

#[async_trait]
impl CarrierGateway for CarrierClient {
    async fn shop_rates(
        &self,
        to: &Address,
        from: &Address,
        parcel: &Parcel,
        carrier_hint: Option<&str>,
    ) -> Result<RateQuote, GatewayError> {
        let url = self.url("shipments")?;
        let body = ShipmentRequest {
            shipment: ShipmentBody {
                to_address: AddressOut::from(to),
                from_address: AddressOut::from(from),
                parcel: ParcelOut::from_canonical(parcel),
                carrier: carrier_hint,
            },
        };
        let dto: ShipmentDto = self.fetch_json(self.http.post(url).json(&body)).await?;

        Ok(RateQuote {
            shipment_id: dto.id,
            created_at: parse_created_at(dto.created_at.as_deref()),
            rates: dto.rates.into_iter().map(RateOption::from).collect(),
        })
    }

    async fn buy_label(
        &self,
        shipment_id: &str,
        rate_id: &str,
    ) -> Result<LabelReceipt, GatewayError> {
        let url = self.url(&format!("shipments/{shipment_id}/buy"))?;
        let body = BuyRequest {
            rate: RateRef { id: rate_id },
        };
        let dto: ShipmentDto = self.fetch_json(self.http.post(url).json(&body)).await?;

        let tracking_code = dto
            .tracking_code
            .ok_or_else(|| GatewayError::Api("purchase response missing a tracking code".into()))?;
        Ok(LabelReceipt {
            tracking_code,
            label_url: dto.postage_label.and_then(|label| label.label_url),
            raw_status: dto.status,
        })
    }

    async fn refund_label(&self, shipment_id: &str) -> Result<RefundReceipt, GatewayError> {
        let url = self.url(&format!("shipments/{shipment_id}/refund"))?;
        let dto: RefundDto = self.fetch_json(self.http.post(url)).await?;
        Ok(RefundReceipt {
            status: dto
                .refund_status
                .or(dto.status)
                .unwrap_or_else(|| "submitted".to_string()),
        })
    }

    async fn retrieve_shipment(&self, shipment_id: &str) -> Result<ShipmentDetail, GatewayError> {
        let url = self.url(&format!("shipments/{shipment_id}"))?;
        let dto: ShipmentDto = self.fetch_json(self.http.get(url)).await?;
        Ok(ShipmentDetail::from(dto))
    }
}

// ============================================================================
// Outbound wire shapes
// ============================================================================

#[derive(Debug, Serialize)]
struct ShipmentRequest<'a> {
    shipment: ShipmentBody<'a>,
}

#[derive(Debug, Serialize)]
struct ShipmentBody<'a> {
    to_address: AddressOut<'a>,
    from_address: AddressOut<'a>,
    parcel: ParcelOut,
    #[serde(skip_serializing_if = "Option::is_none")]
    carrier: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct AddressOut<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    company: Option<&'a str>,
    street1: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    street2: Option<&'a str>,
    city: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<&'a str>,
    zip: &'a str,
    country: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
}

impl<'a> From<&'a Address> for AddressOut<'a> {
    fn from(address: &'a Address) -> Self {
        Self {
            name: address.name.as_deref(),
            company: address.company.as_deref(),
            street1: &address.street1,
            street2: address.street2.as_deref(),
            city: &address.city,
            state: address.state.as_deref(),
            zip: &address.postal_code,
            country: &address.country,
            phone: address.phone.as_deref(),
            email: address.email.as_deref(),
        }
    }
}

/// Parcel in the carrier's units: weight in ounces, dimensions in inches.
#[derive(Debug, Serialize)]
struct ParcelOut {
    weight: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    length: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<f64>,
}

impl ParcelOut {
    fn from_canonical(parcel: &Parcel) -> Self {
        Self {
            weight: kilograms_to_ounces(parcel.weight_kg),
            length: parcel.length_cm.map(centimeters_to_inches),
            width: parcel.width_cm.map(centimeters_to_inches),
            height: parcel.height_cm.map(centimeters_to_inches),
        }
    }
}

#[derive(Debug, Serialize)]
struct BuyRequest<'a> {
    rate: RateRef<'a>,
}

#[derive(Debug, Serialize)]
struct RateRef<'a> {
    id: &'a str,
}

// ============================================================================
// Inbound wire shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ShipmentDto {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    rates: Vec<RateDto>,
    #[serde(default)]
    selected_rate: Option<RateDto>,
    #[serde(default)]
    tracking_code: Option<String>,
    #[serde(default)]
    postage_label: Option<LabelDto>,
    #[serde(default)]
    tracker: Option<TrackerDto>,
    #[serde(default)]
    to_address: Option<AddressDto>,
    #[serde(default)]
    from_address: Option<AddressDto>,
    #[serde(default)]
    parcel: Option<ParcelDto>,
}

#[derive(Debug, Deserialize)]
struct RateDto {
    id: String,
    #[serde(default)]
    carrier: Option<String>,
    #[serde(default)]
    service: Option<String>,
    #[serde(default, deserialize_with = "opt_string_from_json")]
    rate: Option<String>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    delivery_days: Option<i64>,
    #[serde(default, alias = "est_delivery_date")]
    delivery_date: Option<String>,
}

impl From<RateDto> for RateOption {
    fn from(dto: RateDto) -> Self {
        Self {
            id: dto.id,
            carrier: dto.carrier.unwrap_or_else(|| "Unknown".to_string()),
            service: dto.service.unwrap_or_else(|| "Unknown".to_string()),
            price: dto.rate.unwrap_or_else(|| "0.00".to_string()),
            currency: dto.currency.unwrap_or_else(|| "USD".to_string()),
            est_delivery_days: dto.delivery_days,
            est_delivery_date: dto.delivery_date,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LabelDto {
    #[serde(default)]
    label_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TrackerDto {
    #[serde(default)]
    public_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AddressDto {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    company: Option<String>,
    #[serde(default)]
    street1: Option<String>,
    #[serde(default)]
    street2: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    zip: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

impl From<AddressDto> for Address {
    fn from(dto: AddressDto) -> Self {
        Self {
            name: dto.name,
            company: dto.company,
            street1: dto.street1.unwrap_or_default(),
            street2: dto.street2,
            city: dto.city.unwrap_or_default(),
            state: dto.state,
            postal_code: dto.zip.unwrap_or_default(),
            country: dto.country.unwrap_or_default(),
            phone: dto.phone,
            email: dto.email,
        }
    }
}

/// Parcel as the carrier reports it: ounces and inches.
#[derive(Debug, Deserialize)]
struct ParcelDto {
    #[serde(default)]
    weight: Option<f64>,
    #[serde(default)]
    length: Option<f64>,
    #[serde(default)]
    width: Option<f64>,
    #[serde(default)]
    height: Option<f64>,
}

impl From<ParcelDto> for Parcel {
    fn from(dto: ParcelDto) -> Self {
        Self {
            weight_kg: dto.weight.map(ounces_to_kilograms).unwrap_or_default(),
            length_cm: dto.length.map(inches_to_centimeters),
            width_cm: dto.width.map(inches_to_centimeters),
            height_cm: dto.height.map(inches_to_centimeters),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefundDto {
    #[serde(default)]
    refund_status: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

impl From<ShipmentDto> for ShipmentDetail {
    fn from(dto: ShipmentDto) -> Self {
        Self {
            id: dto.id,
            status: dto.status,
            tracking_code: dto.tracking_code,
            label_url: dto.postage_label.and_then(|label| label.label_url),
            tracker_url: dto.tracker.and_then(|tracker| tracker.public_url),
            to_address: dto.to_address.map(Address::from),
            from_address: dto.from_address.map(Address::from),
            parcel: dto.parcel.map(Parcel::from),
            selected_rate: dto.selected_rate.map(RateOption::from),
            created_at: dto.created_at,
        }
    }
}

fn parse_created_at(raw: Option<&str>) -> u64 {
    raw.and_then(|value| {
        OffsetDateTime::parse(value, &Rfc3339)
            .ok()
            .and_then(|dt| u64::try_from(dt.unix_timestamp()).ok())
    })
    .unwrap_or_else(unix_now)
}

/// The API is sloppy about numeric fields: prices arrive as either strings
/// or bare numbers. Normalize both to the decimal string we store.
fn opt_string_from_json<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Float(f64),
        Int(i64),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(value) => value,
        Raw::Float(value) => format!("{value:.2}"),
        Raw::Int(value) => value.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shipment_dto_maps_to_rate_quote_fields() {
        let dto: ShipmentDto = serde_json::from_str(
            r#"{
                "id": "shp_9f2",
                "status": "unknown",
                "created_at": "2026-08-01T09:30:00Z",
                "rates": [
                    {"id": "rate_a", "carrier": "RoyalMail", "service": "Tracked48",
                     "rate": "9.99", "currency": "GBP", "delivery_days": 2},
                    {"id": "rate_b", "carrier": "DHL", "service": "Express",
                     "rate": 15.5, "currency": "GBP"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(dto.id, "shp_9f2");
        let rates: Vec<RateOption> = dto.rates.into_iter().map(RateOption::from).collect();
        assert_eq!(rates[0].price, "9.99");
        // Bare-number prices normalize to two decimal places.
        assert_eq!(rates[1].price, "15.50");
        assert_eq!(rates[1].carrier, "DHL");
        assert_eq!(parse_created_at(Some("2026-08-01T09:30:00Z")), 1_785_576_600);
    }

    #[test]
    fn parcel_converts_to_carrier_units_on_the_way_out() {
        let parcel = Parcel {
            weight_kg: 15.0,
            length_cm: Some(30.0),
            width_cm: None,
            height_cm: None,
        };
        let out = ParcelOut::from_canonical(&parcel);

        assert!((out.weight - 529.11).abs() < 0.01);
        assert!((out.length.unwrap() - 11.811).abs() < 0.001);
        assert!(out.width.is_none());
    }

    #[test]
    fn detail_snapshot_converts_parcel_back_to_canonical_units() {
        let dto: ShipmentDto = serde_json::from_str(
            r#"{
                "id": "shp_9f2",
                "status": "delivered",
                "tracking_code": "TRK1",
                "postage_label": {"label_url": "https://labels.example/1.png"},
                "tracker": {"public_url": "https://track.example/TRK1"},
                "parcel": {"weight": 529.11, "length": 11.811},
                "selected_rate": {"id": "rate_a", "carrier": "RoyalMail",
                                  "service": "Tracked48", "rate": "9.99", "currency": "GBP"}
            }"#,
        )
        .unwrap();
        let detail = ShipmentDetail::from(dto);

        assert_eq!(detail.label_url.as_deref(), Some("https://labels.example/1.png"));
        assert_eq!(detail.tracker_url.as_deref(), Some("https://track.example/TRK1"));
        let parcel = detail.parcel.unwrap();
        assert!((parcel.weight_kg - 15.0).abs() < 0.001);
        assert!((parcel.length_cm.unwrap() - 30.0).abs() < 0.01);
        assert_eq!(detail.selected_rate.unwrap().price, "9.99");
    }

    #[test]
    fn missing_rate_fields_fall_back_to_placeholders() {
        let dto: RateDto = serde_json::from_str(r#"{"id": "rate_x"}"#).unwrap();
        let rate = RateOption::from(dto);
        assert_eq!(rate.carrier, "Unknown");
        assert_eq!(rate.price, "0.00");
        assert_eq!(rate.currency, "USD");
    }

    #[test]
    fn error_envelope_parses_carrier_failures() {
        let envelope: ErrorEnvelope = serde_json::from_str(
            r#"{"error": {"code": "SHIPMENT.INVALID", "message": "parcel weight required"}}"#,
        )
        .unwrap();
        assert_eq!(envelope.error.message, "parcel weight required");
    }
}
