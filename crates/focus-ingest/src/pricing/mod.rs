//! Static usage price tables
//!
//! Token prices are USD per 1M tokens as `(input, output)` in cents.
//! Non-token prices are USD per unit in thousandths of a dollar.

pub mod calculator;

pub use calculator::{CostBreakdown, CostCalculator, PricingSource, UsageShape};

use regex::Regex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Version tag of the bundled tables, logged on lookup misses
pub const PRICING_VERSION: &str = "2025-06";

/// Input and output price per 1M tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenPrice {
    pub input: Decimal,
    pub output: Decimal,
}

impl TokenPrice {
    fn cents(input: i64, output: i64) -> Self {
        Self {
            input: Decimal::new(input, 2),
            output: Decimal::new(output, 2),
        }
    }
}

/// Billing unit of a non-token price
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingUnit {
    Image,
    Minute,
    MillionCharacters,
    Container,
    GbDay,
    ThousandCalls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitPrice {
    pub price: Decimal,
    pub unit: BillingUnit,
}

const TEXT_TOKENS: &[(&str, i64, i64)] = &[
    ("gpt-4.1", 200, 800),
    ("gpt-4.1-2025-04-14", 200, 800),
    ("gpt-4.1-mini", 40, 160),
    ("gpt-4.1-mini-2025-04-14", 40, 160),
    ("gpt-4.1-nano", 10, 40),
    ("gpt-4.1-nano-2025-04-14", 10, 40),
    ("gpt-4.5-preview", 7500, 15000),
    ("gpt-4.5-preview-2025-02-27", 7500, 15000),
    ("gpt-4o", 250, 1000),
    ("gpt-4o-2024-11-20", 250, 1000),
    ("gpt-4o-2024-08-06", 250, 1000),
    ("gpt-4o-2024-05-13", 500, 1500),
    ("gpt-4o-audio-preview", 250, 1000),
    ("gpt-4o-audio-preview-2025-06-03", 250, 1000),
    ("gpt-4o-audio-preview-2024-12-17", 250, 1000),
    ("gpt-4o-audio-preview-2024-10-01", 250, 1000),
    ("gpt-4o-realtime-preview", 500, 2000),
    ("gpt-4o-realtime-preview-2025-06-03", 500, 2000),
    ("gpt-4o-realtime-preview-2024-12-17", 500, 2000),
    ("gpt-4o-realtime-preview-2024-10-01", 500, 2000),
    ("gpt-4o-mini", 15, 60),
    ("gpt-4o-mini-2024-07-18", 15, 60),
    ("gpt-4o-mini-audio-preview", 15, 60),
    ("gpt-4o-mini-audio-preview-2024-12-17", 15, 60),
    ("gpt-4o-mini-realtime-preview", 60, 240),
    ("gpt-4o-mini-realtime-preview-2024-12-17", 60, 240),
    ("o1", 1500, 6000),
    ("o1-2024-12-17", 1500, 6000),
    ("o1-preview-2024-09-12", 1500, 6000),
    ("o1-pro", 15000, 60000),
    ("o1-pro-2025-03-19", 15000, 60000),
    ("o3", 200, 800),
    ("o3-2025-04-16", 200, 800),
    ("o3-pro", 2000, 8000),
    ("o3-pro-2025-06-10", 2000, 8000),
    ("o3-deep-research", 1000, 4000),
    ("o3-deep-research-2025-06-26", 1000, 4000),
    ("o4-mini", 110, 440),
    ("o4-mini-2025-04-16", 110, 440),
    ("o4-mini-deep-research", 200, 800),
    ("o4-mini-deep-research-2025-06-26", 200, 800),
    ("o3-mini", 110, 440),
    ("o3-mini-2025-01-31", 110, 440),
    ("o1-mini", 110, 440),
    ("o1-mini-2024-09-12", 110, 440),
    ("codex-mini-latest", 150, 600),
    ("gpt-4o-mini-search-preview", 15, 60),
    ("gpt-4o-mini-search-preview-2025-03-11", 15, 60),
    ("gpt-4o-search-preview", 250, 1000),
    ("gpt-4o-search-preview-2025-03-11", 250, 1000),
    ("computer-use-preview", 300, 1200),
    ("computer-use-preview-2025-03-11", 300, 1200),
    ("gpt-image-1", 500, 0),
    ("chatgpt-4o-latest", 500, 1500),
    ("gpt-4-turbo", 1000, 3000),
    ("gpt-4-turbo-2024-04-09", 1000, 3000),
    ("gpt-4-0125-preview", 1000, 3000),
    ("gpt-4-1106-preview", 1000, 3000),
    ("gpt-4-1106-vision-preview", 1000, 3000),
    ("gpt-4", 3000, 6000),
    ("gpt-4-0613", 3000, 6000),
    ("gpt-4-0314", 3000, 6000),
    ("gpt-4-32k", 6000, 12000),
    ("gpt-3.5-turbo", 50, 150),
    ("gpt-3.5-turbo-0125", 50, 150),
    ("gpt-3.5-turbo-1106", 100, 200),
    ("gpt-3.5-turbo-0613", 150, 200),
    ("gpt-3.5-0301", 150, 200),
    ("gpt-3.5-turbo-instruct", 150, 200),
    ("gpt-3.5-turbo-16k-0613", 300, 400),
    ("text-embedding-3-large", 13, 0),
    ("text-embedding-3-small", 2, 0),
    ("text-embedding-ada-002", 10, 0),
    ("davinci-002", 200, 200),
    ("babbage-002", 40, 40),
];

const AUDIO_TOKENS: &[(&str, i64, i64)] = &[
    ("gpt-4o-audio-preview-2025-06-03", 4000, 8000),
    ("gpt-4o-audio-preview-2024-12-17", 4000, 8000),
    ("gpt-4o-audio-preview-2024-10-01", 10000, 20000),
    ("gpt-4o-mini-audio-preview-2024-12-17", 1000, 2000),
    ("gpt-4o-realtime-preview-2024-12-17", 4000, 8000),
    ("gpt-4o-realtime-preview-2025-06-03", 4000, 8000),
    ("gpt-4o-realtime-preview-2024-10-01", 10000, 20000),
    ("gpt-4o-mini-realtime-preview-2024-12-17", 1000, 2000),
];

const IMAGE_TOKENS: &[(&str, i64, i64)] = &[("gpt-image-1", 1000, 4000)];

const FLEX_TOKENS: &[(&str, i64, i64)] = &[
    ("o3-2025-04-16", 100, 400),
    ("o4-mini-2025-04-16", 55, 220),
];

const NON_TOKEN: &[(&str, i64, BillingUnit)] = &[
    ("dall-e-3", 40, BillingUnit::Image),
    ("dall-e-3-hd", 80, BillingUnit::Image),
    ("dall-e-2", 20, BillingUnit::Image),
    ("gpt-image-1-low", 11, BillingUnit::Image),
    ("gpt-image-1-medium", 42, BillingUnit::Image),
    ("gpt-image-1-high", 167, BillingUnit::Image),
    ("whisper-1", 6, BillingUnit::Minute),
    ("tts-1", 15_000, BillingUnit::MillionCharacters),
    ("tts-1-hd", 30_000, BillingUnit::MillionCharacters),
    ("gpt-4o-transcribe", 6, BillingUnit::Minute),
    ("gpt-4o-mini-transcribe", 3, BillingUnit::Minute),
    ("gpt-4o-mini-tts", 15, BillingUnit::Minute),
    ("code-interpreter", 30, BillingUnit::Container),
    ("file-search-storage", 100, BillingUnit::GbDay),
    ("file-search-tool", 2_500, BillingUnit::ThousandCalls),
    ("web-search-gpt4", 25_000, BillingUnit::ThousandCalls),
    ("web-search-o3", 10_000, BillingUnit::ThousandCalls),
];

const FREE_MODEL_PATTERNS: &[&str] = &[r"^text-moderation.*", r"^omni-moderation.*"];

static OPENAI: LazyLock<PriceTable> = LazyLock::new(PriceTable::build_openai);

/// Versioned price table for one usage-metered provider
#[derive(Debug)]
pub struct PriceTable {
    text: HashMap<&'static str, TokenPrice>,
    audio: HashMap<&'static str, TokenPrice>,
    image: HashMap<&'static str, TokenPrice>,
    flex: HashMap<&'static str, TokenPrice>,
    non_token: HashMap<&'static str, UnitPrice>,
    free: Vec<Regex>,
}

impl PriceTable {
    /// Bundled OpenAI table
    pub fn openai() -> &'static PriceTable {
        &OPENAI
    }

    fn build_openai() -> Self {
        let tokens = |rows: &[(&'static str, i64, i64)]| {
            rows.iter()
                .map(|(model, input, output)| (*model, TokenPrice::cents(*input, *output)))
                .collect::<HashMap<_, _>>()
        };
        Self {
            text: tokens(TEXT_TOKENS),
            audio: tokens(AUDIO_TOKENS),
            image: tokens(IMAGE_TOKENS),
            flex: tokens(FLEX_TOKENS),
            non_token: NON_TOKEN
                .iter()
                .map(|(model, mills, unit)| {
                    (
                        *model,
                        UnitPrice {
                            price: Decimal::new(*mills, 3),
                            unit: *unit,
                        },
                    )
                })
                .collect(),
            free: FREE_MODEL_PATTERNS
                .iter()
                .filter_map(|pattern| Regex::new(pattern).ok())
                .collect(),
        }
    }

    /// Flex price, only consulted when flex processing is requested
    pub fn flex_price(&self, model: &str) -> Option<TokenPrice> {
        self.flex.get(model).copied()
    }

    /// Token price from the text, audio-token and image-token tables, in that order
    pub fn token_price(&self, model: &str) -> Option<TokenPrice> {
        self.text
            .get(model)
            .or_else(|| self.audio.get(model))
            .or_else(|| self.image.get(model))
            .copied()
    }

    pub fn unit_price(&self, model: &str) -> Option<UnitPrice> {
        self.non_token.get(model).copied()
    }

    pub fn is_free(&self, model: &str) -> bool {
        self.free.iter().any(|re| re.is_match(model))
    }

    pub fn supports_flex(&self, model: &str) -> bool {
        self.flex.contains_key(model)
    }

    /// Every model with an explicit price, sorted
    pub fn models(&self) -> Vec<&'static str> {
        let mut models: Vec<&'static str> = self
            .text
            .keys()
            .chain(self.audio.keys())
            .chain(self.image.keys())
            .chain(self.flex.keys())
            .chain(self.non_token.keys())
            .copied()
            .collect();
        models.sort_unstable();
        models.dedup();
        models
    }
}
