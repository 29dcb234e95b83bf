//! Usage cost calculation over a [`PriceTable`]

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

use super::{BillingUnit, PriceTable, TokenPrice, PRICING_VERSION};

/// Flat fee per request for token-priced models reported with request counts only
const REQUEST_FALLBACK_PRICE: Decimal = Decimal::from_parts(1, 0, 0, false, 3);

/// Characters assumed per request when a character-priced model reports requests
const CHARACTERS_PER_REQUEST: i64 = 200;

/// Metered quantity to be priced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageShape {
    Tokens { input: i64, output: i64 },
    Images { count: i64 },
    Audio { seconds: Decimal },
    Characters { count: i64 },
    /// Code interpreter sessions
    Containers { count: i64 },
    /// Vector store storage
    StorageGbDays { gb_days: Decimal },
    /// Tool invocations such as file or web search
    Calls { count: i64 },
    Requests { count: i64 },
}

impl UsageShape {
    /// Total quantity in the shape's own unit
    pub fn quantity(&self) -> Decimal {
        match self {
            UsageShape::Tokens { input, output } => Decimal::from(*input) + Decimal::from(*output),
            UsageShape::Images { count }
            | UsageShape::Characters { count }
            | UsageShape::Containers { count }
            | UsageShape::Calls { count }
            | UsageShape::Requests { count } => Decimal::from(*count),
            UsageShape::Audio { seconds } => *seconds,
            UsageShape::StorageGbDays { gb_days } => *gb_days,
        }
    }
}

/// Which table produced a price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PricingSource {
    Flex,
    Table,
    Free,
    Miss,
}

/// Priced usage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostBreakdown {
    pub model: String,
    pub total: Decimal,
    pub components: BTreeMap<String, Decimal>,
    pub blended_unit_price: Option<Decimal>,
    pub source: PricingSource,
}

impl CostBreakdown {
    fn new(model: &str, shape: &UsageShape, components: BTreeMap<String, Decimal>, source: PricingSource) -> Self {
        let total: Decimal = components.values().copied().sum();
        let quantity = shape.quantity();
        let blended_unit_price = (!quantity.is_zero()).then(|| total / quantity);
        Self {
            model: model.to_string(),
            total,
            components,
            blended_unit_price,
            source,
        }
    }
}

/// Prices usage against a static table.
///
/// Resolution order: flex table (only when enabled), token tables, non-token
/// table, free patterns, then a zero-cost miss.
#[derive(Debug, Clone, Copy)]
pub struct CostCalculator {
    table: &'static PriceTable,
    flex_processing: bool,
}

impl Default for CostCalculator {
    fn default() -> Self {
        Self::new(PriceTable::openai(), false)
    }
}

impl CostCalculator {
    pub fn new(table: &'static PriceTable, flex_processing: bool) -> Self {
        Self {
            table,
            flex_processing,
        }
    }

    pub fn with_flex(mut self, flex_processing: bool) -> Self {
        self.flex_processing = flex_processing;
        self
    }

    pub fn calculate(&self, model: &str, shape: &UsageShape) -> CostBreakdown {
        if let Some((price, source)) = self.resolve_token_price(model) {
            if let Some(components) = token_components(&price, shape) {
                return CostBreakdown::new(model, shape, components, source);
            }
        }

        if let Some(unit_price) = self.table.unit_price(model) {
            if let Some((name, quantity)) = unit_quantity(unit_price.unit, shape) {
                let components = BTreeMap::from([(name.to_string(), quantity * unit_price.price)]);
                return CostBreakdown::new(model, shape, components, PricingSource::Table);
            }
        }

        if self.table.is_free(model) {
            return CostBreakdown::new(model, shape, zero_components(shape), PricingSource::Free);
        }

        warn!(
            model,
            pricing_version = PRICING_VERSION,
            usage = ?shape,
            "PricingLookupMiss: no price entry, costing at zero"
        );
        CostBreakdown::new(model, shape, zero_components(shape), PricingSource::Miss)
    }

    fn resolve_token_price(&self, model: &str) -> Option<(TokenPrice, PricingSource)> {
        if self.flex_processing {
            if let Some(price) = self.table.flex_price(model) {
                return Some((price, PricingSource::Flex));
            }
        }
        self.table
            .token_price(model)
            .map(|price| (price, PricingSource::Table))
    }
}

fn per_million(quantity: i64, price: Decimal) -> Decimal {
    Decimal::from(quantity) / Decimal::from(1_000_000) * price
}

/// Components for token-priced models; `None` when the shape is not token-priceable
fn token_components(price: &TokenPrice, shape: &UsageShape) -> Option<BTreeMap<String, Decimal>> {
    match shape {
        UsageShape::Tokens { input, output } => Some(BTreeMap::from([
            ("input".to_string(), per_million(*input, price.input)),
            ("output".to_string(), per_million(*output, price.output)),
        ])),
        UsageShape::Requests { count } => Some(BTreeMap::from([(
            "requests".to_string(),
            Decimal::from(*count) * REQUEST_FALLBACK_PRICE,
        )])),
        _ => None,
    }
}

/// Quantity in the unit of a non-token price
fn unit_quantity(unit: BillingUnit, shape: &UsageShape) -> Option<(&'static str, Decimal)> {
    match (unit, shape) {
        (BillingUnit::Image, UsageShape::Images { count }) => Some(("images", Decimal::from(*count))),
        (BillingUnit::Minute, UsageShape::Audio { seconds }) => {
            Some(("audio", *seconds / Decimal::from(60)))
        }
        (BillingUnit::MillionCharacters, UsageShape::Characters { count }) => {
            Some(("characters", Decimal::from(*count) / Decimal::from(1_000_000)))
        }
        (BillingUnit::MillionCharacters, UsageShape::Requests { count }) => Some((
            "characters",
            Decimal::from(*count) * Decimal::from(CHARACTERS_PER_REQUEST) / Decimal::from(1_000_000),
        )),
        (BillingUnit::Container, UsageShape::Containers { count }) => {
            Some(("containers", Decimal::from(*count)))
        }
        (BillingUnit::GbDay, UsageShape::StorageGbDays { gb_days }) => Some(("storage", *gb_days)),
        (BillingUnit::ThousandCalls, UsageShape::Calls { count }) => {
            Some(("calls", Decimal::from(*count) / Decimal::from(1_000)))
        }
        // Metered in their own count fields; a bare request count bills nothing
        (BillingUnit::Container | BillingUnit::GbDay | BillingUnit::ThousandCalls, UsageShape::Requests { .. }) => {
            Some(("requests", Decimal::ZERO))
        }
        _ => None,
    }
}

fn zero_components(shape: &UsageShape) -> BTreeMap<String, Decimal> {
    let names: &[&str] = match shape {
        UsageShape::Tokens { .. } => &["input", "output"],
        UsageShape::Images { .. } => &["images"],
        UsageShape::Audio { .. } => &["audio"],
        UsageShape::Characters { .. } => &["characters"],
        UsageShape::Containers { .. } => &["containers"],
        UsageShape::StorageGbDays { .. } => &["storage"],
        UsageShape::Calls { .. } => &["calls"],
        UsageShape::Requests { .. } => &["requests"],
    };
    names
        .iter()
        .map(|name| (name.to_string(), Decimal::ZERO))
        .collect()
}
