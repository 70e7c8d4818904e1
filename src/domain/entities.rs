use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::{format_age, unix_now};

/// Recipient or sender address. Country defaults to the configured home
/// country when left empty (see [`Address::apply_home_country`]).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    pub street1: String,
    #[serde(default)]
    pub street2: Option<String>,
    pub city: String,
    #[serde(default)]
    pub state: Option<String>,
    pub postal_code: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl Address {
    /// Fill in the configured home country when none was supplied.
    pub fn apply_home_country(&mut self, home_country: &str) {
        if self.country.trim().is_empty() {
            self.country = home_country.to_string();
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.street1.trim().is_empty() {
            return Err("address is missing street line 1".to_string());
        }
        if self.city.trim().is_empty() {
            return Err("address is missing a city".to_string());
        }
        if self.postal_code.trim().is_empty() {
            return Err("address is missing a postal code".to_string());
        }
        if self.country.trim().is_empty() {
            return Err("address is missing a country code".to_string());
        }
        Ok(())
    }

    /// Single-line rendering for listings.
    pub fn one_line(&self) -> String {
        let mut parts = vec![self.street1.clone()];
        if let Some(street2) = self.street2.as_ref().filter(|s| !s.is_empty()) {
            parts.push(street2.clone());
        }
        let mut locality = self.city.clone();
        if let Some(state) = self.state.as_ref().filter(|s| !s.is_empty()) {
            locality.push(' ');
            locality.push_str(state);
        }
        locality.push(' ');
        locality.push_str(&self.postal_code);
        parts.push(locality);
        parts.push(self.country.clone());
        parts.join(", ")
    }
}

/// Parcel in canonical units: kilograms and centimeters. A `None` dimension
/// means "unspecified", not zero.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Parcel {
    pub weight_kg: f64,
    #[serde(default)]
    pub length_cm: Option<f64>,
    #[serde(default)]
    pub width_cm: Option<f64>,
    #[serde(default)]
    pub height_cm: Option<f64>,
}

impl Parcel {
    pub fn validate(&self) -> Result<(), String> {
        if !self.weight_kg.is_finite() || self.weight_kg <= 0.0 {
            return Err("parcel weight must be a positive number of kilograms".to_string());
        }
        for (label, dim) in [
            ("length", self.length_cm),
            ("width", self.width_cm),
            ("height", self.height_cm),
        ] {
            if let Some(value) = dim {
                if !value.is_finite() || value <= 0.0 {
                    return Err(format!(
                        "parcel {label} must be a positive number of centimeters"
                    ));
                }
            }
        }
        Ok(())
    }
}

/// One priced shipping option attached to a pending shipment. Immutable once
/// quoted; invalid as soon as the shipment leaves `pending`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RateOption {
    pub id: String,
    pub carrier: String,
    pub service: String,
    /// Decimal string straight from the carrier, kept verbatim to avoid float
    /// rounding in displayed prices.
    pub price: String,
    pub currency: String,
    #[serde(default)]
    pub est_delivery_days: Option<i64>,
    #[serde(default)]
    pub est_delivery_date: Option<String>,
}

impl RateOption {
    /// Numeric price for sorting. Unparsable prices sort last.
    pub fn price_value(&self) -> f64 {
        self.price.trim().parse::<f64>().unwrap_or(f64::MAX)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShipmentStatus {
    #[default]
    Pending,
    Purchased,
    Voided,
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShipmentStatus::Pending => write!(f, "pending"),
            ShipmentStatus::Purchased => write!(f, "purchased"),
            ShipmentStatus::Voided => write!(f, "voided"),
        }
    }
}

/// A rate reservation: priced options held locally until the operator commits
/// to buying, cancels, or voids. The store owns the canonical copy; callers
/// always receive clones.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingShipment {
    /// Carrier-assigned identifier, stable for the shipment's lifetime.
    pub id: String,
    /// Unix timestamp (seconds) when the reservation was created.
    pub created_at: u64,
    #[serde(default)]
    pub order_ref: Option<String>,
    pub to_address: Address,
    pub from_address: Address,
    pub parcel: Parcel,
    /// Quote snapshot taken at creation, sorted ascending by numeric price.
    /// Never refreshed; a purchase must reference one of these by id.
    pub rates: Vec<RateOption>,
    pub status: ShipmentStatus,
    #[serde(default)]
    pub tracking_code: Option<String>,
    #[serde(default)]
    pub label_url: Option<String>,
}

impl PendingShipment {
    pub fn find_rate(&self, rate_id: &str) -> Option<&RateOption> {
        self.rates.iter().find(|rate| rate.id == rate_id)
    }

    pub fn rate_ids(&self) -> Vec<&str> {
        self.rates.iter().map(|rate| rate.id.as_str()).collect()
    }

    pub fn age(&self) -> Duration {
        Duration::from_secs(unix_now().saturating_sub(self.created_at))
    }

    /// Human-readable age string for listings.
    pub fn age_string(&self) -> String {
        format_age(self.age().as_secs())
    }
}

/// The persisted shipment table. Owned exclusively by the store; no other
/// component touches the backing file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ShipmentState {
    #[serde(default)]
    pub shipments: HashMap<String, PendingShipment>,
    /// Unix timestamp (seconds) of the last save.
    #[serde(default)]
    pub last_updated: u64,
}

/// Summary returned by a successful purchase. Rate fields come from the
/// matched [`RateOption`], not the cheapest one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PurchasedLabel {
    pub shipment_id: String,
    pub tracking_code: String,
    #[serde(default)]
    pub label_url: Option<String>,
    pub carrier: String,
    pub service: String,
    pub price: String,
    pub currency: String,
}

/// The carrier's live view of a shipment, independent of local state. Useful
/// for tracking updates after purchase.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ShipmentDetail {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub tracking_code: Option<String>,
    #[serde(default)]
    pub label_url: Option<String>,
    #[serde(default)]
    pub tracker_url: Option<String>,
    #[serde(default)]
    pub to_address: Option<Address>,
    #[serde(default)]
    pub from_address: Option<Address>,
    #[serde(default)]
    pub parcel: Option<Parcel>,
    #[serde(default)]
    pub selected_rate: Option<RateOption>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Structured result for operations whose failures are routine operator
/// outcomes rather than errors (cancellation, void).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub success: bool,
    pub message: String,
}

impl OperationOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate(id: &str, price: &str) -> RateOption {
        RateOption {
            id: id.to_string(),
            carrier: "RoyalMail".to_string(),
            service: "Tracked24".to_string(),
            price: price.to_string(),
            currency: "GBP".to_string(),
            est_delivery_days: Some(1),
            est_delivery_date: None,
        }
    }

    #[test]
    fn price_value_parses_decimal_strings() {
        assert_eq!(rate("r1", "9.99").price_value(), 9.99);
        assert_eq!(rate("r2", " 15.50 ").price_value(), 15.5);
    }

    #[test]
    fn unparsable_price_sorts_last() {
        let mut rates = vec![rate("bad", "n/a"), rate("ok", "3.20")];
        rates.sort_by(|a, b| a.price_value().total_cmp(&b.price_value()));
        assert_eq!(rates[0].id, "ok");
    }

    #[test]
    fn address_validation_requires_core_fields() {
        let mut address = Address {
            street1: "10 Downing St".to_string(),
            city: "London".to_string(),
            postal_code: "SW1A 2AA".to_string(),
            country: "GB".to_string(),
            ..Address::default()
        };
        assert!(address.validate().is_ok());

        address.city.clear();
        assert!(address.validate().unwrap_err().contains("city"));
    }

    #[test]
    fn empty_country_takes_home_default() {
        let mut address = Address {
            street1: "1 Main St".to_string(),
            city: "Springfield".to_string(),
            postal_code: "62704".to_string(),
            ..Address::default()
        };
        address.apply_home_country("US");
        assert_eq!(address.country, "US");

        address.country = "DE".to_string();
        address.apply_home_country("US");
        assert_eq!(address.country, "DE");
    }

    #[test]
    fn parcel_validation_rejects_nonpositive_values() {
        let parcel = Parcel {
            weight_kg: 0.0,
            ..Parcel::default()
        };
        assert!(parcel.validate().is_err());

        let parcel = Parcel {
            weight_kg: 2.5,
            width_cm: Some(-3.0),
            ..Parcel::default()
        };
        assert!(parcel.validate().unwrap_err().contains("width"));

        let parcel = Parcel {
            weight_kg: 15.0,
            ..Parcel::default()
        };
        assert!(parcel.validate().is_ok());
    }

    #[test]
    fn find_rate_matches_by_id() {
        let shipment = PendingShipment {
            id: "shp_1".to_string(),
            created_at: 0,
            order_ref: None,
            to_address: Address::default(),
            from_address: Address::default(),
            parcel: Parcel::default(),
            rates: vec![rate("rate_a", "4.00"), rate("rate_b", "7.50")],
            status: ShipmentStatus::Pending,
            tracking_code: None,
            label_url: None,
        };
        assert_eq!(
            shipment.find_rate("rate_b").map(|r| r.price.as_str()),
            Some("7.50")
        );
        assert!(shipment.find_rate("rate_c").is_none());
        assert_eq!(shipment.rate_ids(), vec!["rate_a", "rate_b"]);
    }
}
