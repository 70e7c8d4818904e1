//! Domain model for the reservation workflow lives here.

pub mod entities;
pub mod units;

#[allow(unused_imports)]
pub use entities::{
    Address, OperationOutcome, Parcel, PendingShipment, PurchasedLabel, RateOption, ShipmentDetail,
    ShipmentState, ShipmentStatus,
};
