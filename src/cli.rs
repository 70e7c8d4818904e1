//! Operator command surface. Each subcommand maps 1:1 onto one workflow or
//! cache operation; `--help` doubles as the list of available operations.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use crate::domain::{Address, OperationOutcome, Parcel, PendingShipment, RateOption, ShipmentDetail};
use crate::infra::cache::{CacheStatus, ResultCache};
use crate::infra::{CarrierClient, OrderServiceClient};
use crate::util::config;
use crate::util::format_age;
use crate::util::persistence::ShipmentStore;
use crate::workflow::{CreateShipmentRequest, ShippingWorkflow, DETAIL_CACHE_TTL};

#[derive(Parser)]
#[command(name = "rate-keeper")]
#[command(about = "Reserve shipping rate quotes now; buy labels deliberately later")]
#[command(version)]
pub struct Cli {
    /// Bypass the lookup cache for this invocation
    #[arg(long, global = true)]
    pub no_cache: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Reserve rate quotes for a new shipment
    Create(CreateArgs),
    /// Buy a label using one of a pending shipment's reserved rates
    Buy {
        shipment_id: String,
        rate_id: String,
    },
    /// Cancel a pending shipment before purchase
    Cancel { shipment_id: String },
    /// Show the carrier's live view of a shipment
    Show {
        shipment_id: String,
        /// Force a fresh lookup instead of the cached one
        #[arg(long)]
        refresh: bool,
    },
    /// List local shipments still awaiting a purchase decision
    Pending,
    /// List the rates reserved for a shipment at creation time
    Rates { shipment_id: String },
    /// Void a purchased label and request a refund
    Void { shipment_id: String },
    /// Show lookup cache statistics
    CacheStats,
    /// Remove all lookup cache entries
    CacheClear,
}

const ADDRESS_FLAGS: [&str; 10] = [
    "name", "company", "street1", "street2", "city", "state", "zip", "country", "phone", "email",
];

#[derive(Args)]
pub struct CreateArgs {
    /// Order reference whose shipping address becomes the destination
    #[arg(long = "order", conflicts_with_all = ADDRESS_FLAGS)]
    pub order: Option<String>,

    /// Recipient name
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub company: Option<String>,
    /// Destination street line 1
    #[arg(long)]
    pub street1: Option<String>,
    #[arg(long)]
    pub street2: Option<String>,
    #[arg(long)]
    pub city: Option<String>,
    /// State or region
    #[arg(long)]
    pub state: Option<String>,
    /// Postal code
    #[arg(long)]
    pub zip: Option<String>,
    /// Country code; defaults to the configured home country
    #[arg(long)]
    pub country: Option<String>,
    #[arg(long)]
    pub phone: Option<String>,
    #[arg(long)]
    pub email: Option<String>,

    /// Parcel weight in kilograms
    #[arg(long)]
    pub weight: f64,
    /// Parcel length in centimeters
    #[arg(long)]
    pub length: Option<f64>,
    /// Parcel width in centimeters
    #[arg(long)]
    pub width: Option<f64>,
    /// Parcel height in centimeters
    #[arg(long)]
    pub height: Option<f64>,

    /// Keep only rates from this carrier (matched case-insensitively)
    #[arg(long)]
    pub carrier: Option<String>,
}

impl CreateArgs {
    fn destination(&self) -> Option<Address> {
        let supplied = self.street1.is_some() || self.city.is_some() || self.zip.is_some();
        supplied.then(|| Address {
            name: self.name.clone(),
            company: self.company.clone(),
            street1: self.street1.clone().unwrap_or_default(),
            street2: self.street2.clone(),
            city: self.city.clone().unwrap_or_default(),
            state: self.state.clone(),
            postal_code: self.zip.clone().unwrap_or_default(),
            country: self.country.clone().unwrap_or_default(),
            phone: self.phone.clone(),
            email: self.email.clone(),
        })
    }

    fn parcel(&self) -> Parcel {
        Parcel {
            weight_kg: self.weight,
            length_cm: self.length,
            width_cm: self.width,
            height_cm: self.height,
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::CacheStats => {
            let cache = open_cache(cli.no_cache)?;
            let stats = cache.stats();
            println!("Cache entries: {}", stats.entries);
            println!("Hits:          {}", stats.hits);
            println!("Misses:        {}", stats.misses);
            if let Some(age) = stats.oldest_entry_age {
                println!("Oldest entry:  {age}");
            }
            Ok(())
        }
        Commands::CacheClear => {
            let cache = open_cache(cli.no_cache)?;
            println!("[cache] Removed {} entries", cache.clear());
            Ok(())
        }
        command => {
            let workflow = build_workflow(cli.no_cache)?;
            dispatch(&workflow, command).await
        }
    }
}

async fn dispatch(
    workflow: &ShippingWorkflow<OrderServiceClient, CarrierClient>,
    command: Commands,
) -> anyhow::Result<()> {
    match command {
        Commands::Create(args) => {
            let request = CreateShipmentRequest {
                order_ref: args.order.clone(),
                to_address: args.destination(),
                parcel: args.parcel(),
                carrier_filter: args.carrier.clone(),
            };
            let shipment = workflow.create_shipment(request).await?;
            print_shipment(&shipment);
            println!();
            println!(
                "Reserved {} rate(s). Buy with: rate-keeper buy {} <rate-id>",
                shipment.rates.len(),
                shipment.id
            );
            Ok(())
        }
        Commands::Buy {
            shipment_id,
            rate_id,
        } => {
            let label = workflow.buy_label(&shipment_id, &rate_id).await?;
            println!("Purchased {} {} for shipment {}", label.carrier, label.service, label.shipment_id);
            println!("Price:    {} {}", label.price, label.currency);
            println!("Tracking: {}", label.tracking_code);
            if let Some(url) = &label.label_url {
                println!("Label:    {url}");
            }
            Ok(())
        }
        Commands::Cancel { shipment_id } => {
            print_outcome(workflow.cancel_shipment(&shipment_id)?);
            Ok(())
        }
        Commands::Show {
            shipment_id,
            refresh,
        } => {
            let payload = workflow.get_shipment(&shipment_id, refresh).await?;
            print_detail(&payload.data);
            let age = payload
                .fetched_at
                .elapsed()
                .map(|elapsed| format_age(elapsed.as_secs()))
                .unwrap_or_else(|_| "?".to_string());
            match payload.status {
                CacheStatus::Cached => println!(
                    "[cache] Served from cache (age: {age}); --refresh forces a live lookup"
                ),
                CacheStatus::Stale => println!(
                    "[cache] Carrier unreachable; showing a stale cached view (age: {age})"
                ),
                CacheStatus::Fresh => {}
            }
            Ok(())
        }
        Commands::Pending => {
            let pending = workflow.list_pending();
            if pending.is_empty() {
                println!("No pending shipments.");
                return Ok(());
            }
            println!(
                "  {:<14} {:>5}  {:>5}  {:<10}  DESTINATION",
                "SHIPMENT", "AGE", "RATES", "ORDER"
            );
            for shipment in &pending {
                println!(
                    "  {:<14} {:>5}  {:>5}  {:<10}  {}",
                    shipment.id,
                    shipment.age_string(),
                    shipment.rates.len(),
                    shipment.order_ref.as_deref().unwrap_or("-"),
                    shipment.to_address.one_line()
                );
            }
            Ok(())
        }
        Commands::Rates { shipment_id } => {
            let rates = workflow.get_rates(&shipment_id)?;
            print_rates(&rates);
            Ok(())
        }
        Commands::Void { shipment_id } => {
            print_outcome(workflow.void_label(&shipment_id).await?);
            Ok(())
        }
        Commands::CacheStats | Commands::CacheClear => unreachable!("handled before dispatch"),
    }
}

fn build_workflow(
    no_cache: bool,
) -> anyhow::Result<ShippingWorkflow<OrderServiceClient, CarrierClient>> {
    let config = config::load_config()?;
    let resolver = OrderServiceClient::new(&config.orders_base_url)?;
    let gateway = CarrierClient::new(&config.carrier_base_url, config.api_key.clone())?;
    let store = ShipmentStore::open_default()?;
    let cache = open_cache(no_cache)?;
    Ok(ShippingWorkflow::new(
        resolver,
        gateway,
        store,
        cache,
        config.origin,
        config.home_country,
    ))
}

fn open_cache(no_cache: bool) -> anyhow::Result<ResultCache> {
    let mut cache = ResultCache::open_default("carrier", DETAIL_CACHE_TTL)
        .context("platform data directory unavailable")?;
    cache.set_enabled(!no_cache);
    Ok(cache)
}

fn print_shipment(shipment: &PendingShipment) {
    println!("Shipment {} ({})", shipment.id, shipment.status);
    if let Some(order_ref) = &shipment.order_ref {
        println!("Order:    {order_ref}");
    }
    println!("To:       {}", shipment.to_address.one_line());
    println!("From:     {}", shipment.from_address.one_line());
    println!("Parcel:   {}", describe_parcel(&shipment.parcel));
    println!();
    print_rates(&shipment.rates);
}

fn print_rates(rates: &[RateOption]) {
    println!(
        "  {:<12} {:<14} {:<16} {:>10}  DELIVERY",
        "RATE ID", "CARRIER", "SERVICE", "PRICE"
    );
    for rate in rates {
        let delivery = rate
            .est_delivery_date
            .clone()
            .or_else(|| rate.est_delivery_days.map(|days| format!("{days}d")))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<12} {:<14} {:<16} {:>6} {}  {}",
            rate.id, rate.carrier, rate.service, rate.price, rate.currency, delivery
        );
    }
}

fn print_detail(detail: &ShipmentDetail) {
    println!(
        "Shipment {} ({})",
        detail.id,
        detail.status.as_deref().unwrap_or("unknown")
    );
    if let Some(tracking) = &detail.tracking_code {
        println!("Tracking: {tracking}");
    }
    if let Some(url) = &detail.tracker_url {
        println!("Tracker:  {url}");
    }
    if let Some(url) = &detail.label_url {
        println!("Label:    {url}");
    }
    if let Some(address) = &detail.to_address {
        println!("To:       {}", address.one_line());
    }
    if let Some(address) = &detail.from_address {
        println!("From:     {}", address.one_line());
    }
    if let Some(parcel) = &detail.parcel {
        println!("Parcel:   {}", describe_parcel(parcel));
    }
    if let Some(rate) = &detail.selected_rate {
        println!(
            "Rate:     {} {} at {} {}",
            rate.carrier, rate.service, rate.price, rate.currency
        );
    }
    if let Some(created_at) = &detail.created_at {
        println!("Created:  {created_at}");
    }
}

fn describe_parcel(parcel: &Parcel) -> String {
    let mut description = format!("{:.2} kg", parcel.weight_kg);
    if let (Some(length), Some(width), Some(height)) =
        (parcel.length_cm, parcel.width_cm, parcel.height_cm)
    {
        description.push_str(&format!(", {length:.0}x{width:.0}x{height:.0} cm"));
    }
    description
}

fn print_outcome(outcome: OperationOutcome) {
    if outcome.success {
        println!("{}", outcome.message);
    } else {
        println!("Not done: {}", outcome.message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn create_args_build_a_destination_only_when_supplied() {
        let cli = Cli::parse_from([
            "rate-keeper",
            "create",
            "--street1",
            "48 Leicester Square",
            "--city",
            "London",
            "--zip",
            "WC2H 7LU",
            "--country",
            "GB",
            "--weight",
            "15",
        ]);
        let Commands::Create(args) = cli.command else {
            panic!("expected create command");
        };
        let destination = args.destination().unwrap();
        assert_eq!(destination.city, "London");
        assert_eq!(args.parcel().weight_kg, 15.0);

        let cli = Cli::parse_from(["rate-keeper", "create", "--order", "order-42", "--weight", "2"]);
        let Commands::Create(args) = cli.command else {
            panic!("expected create command");
        };
        assert!(args.destination().is_none());
        assert_eq!(args.order.as_deref(), Some("order-42"));
    }

    #[test]
    fn order_reference_conflicts_with_address_flags() {
        let result = Cli::try_parse_from([
            "rate-keeper",
            "create",
            "--order",
            "order-42",
            "--street1",
            "48 Leicester Square",
            "--weight",
            "2",
        ]);
        assert!(result.is_err());
    }
}
