//! Model pricing registry.
//!
//! Text prices are USD per million tokens; image prices are USD per
//! generated image. The built-in table can be overridden per model.

use std::collections::HashMap;
use std::sync::OnceLock;

/// Pricing information for a text model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    /// USD per 1M input tokens.
    pub input_per_million: f64,
    /// USD per 1M output tokens.
    pub output_per_million: f64,
}

impl ModelPricing {
    pub const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    pub fn input_cost(&self, tokens: u32) -> f64 {
        tokens as f64 / 1_000_000.0 * self.input_per_million
    }

    pub fn output_cost(&self, tokens: u32) -> f64 {
        tokens as f64 / 1_000_000.0 * self.output_per_million
    }
}

// =============================================================================
// PRICING DATA
// =============================================================================

// OpenAI (verify periodically against the pricing page)
// gpt-4o-mini: $0.15/1M input, $0.60/1M output
// gpt-4o: $2.50/1M input, $10.00/1M output
const GPT_4O_MINI: ModelPricing = ModelPricing::new(0.15, 0.60);
const GPT_4O: ModelPricing = ModelPricing::new(2.50, 10.00);
const GPT_4_1: ModelPricing = ModelPricing::new(2.00, 8.00);
const GPT_4_1_MINI: ModelPricing = ModelPricing::new(0.40, 1.60);
const GPT_4_1_NANO: ModelPricing = ModelPricing::new(0.10, 0.40);
// GPT-5 family
const GPT_5: ModelPricing = ModelPricing::new(1.25, 10.00);
const GPT_5_MINI: ModelPricing = ModelPricing::new(0.25, 2.00);
const GPT_5_NANO: ModelPricing = ModelPricing::new(0.05, 0.40);
const O1: ModelPricing = ModelPricing::new(15.00, 60.00);
const O1_MINI: ModelPricing = ModelPricing::new(1.10, 4.40);

/// Unknown text models are priced like a mid-range model.
pub const DEFAULT_TEXT_PRICING: ModelPricing = ModelPricing::new(1.00, 5.00);

// Gemini image models, per generated image.
const GEMINI_FLASH_IMAGE: f64 = 0.039;
const GEMINI_3_PRO_IMAGE: f64 = 0.134;

/// Unknown image models are priced like the flash image model.
pub const DEFAULT_IMAGE_PRICE: f64 = GEMINI_FLASH_IMAGE;

static TEXT_PRICING: OnceLock<HashMap<&'static str, ModelPricing>> = OnceLock::new();
static IMAGE_PRICING: OnceLock<HashMap<&'static str, f64>> = OnceLock::new();

fn init_text_pricing() -> HashMap<&'static str, ModelPricing> {
    let mut map = HashMap::new();
    map.insert("gpt-4o-mini", GPT_4O_MINI);
    map.insert("gpt-4o-mini-2024-07-18", GPT_4O_MINI);
    map.insert("gpt-4o", GPT_4O);
    map.insert("gpt-4o-2024-08-06", GPT_4O);
    map.insert("gpt-4.1", GPT_4_1);
    map.insert("gpt-4.1-mini", GPT_4_1_MINI);
    map.insert("gpt-4.1-nano", GPT_4_1_NANO);
    map.insert("gpt-5", GPT_5);
    map.insert("gpt-5.1", GPT_5);
    map.insert("gpt-5-mini", GPT_5_MINI);
    map.insert("gpt-5-nano", GPT_5_NANO);
    map.insert("o1", O1);
    map.insert("o1-mini", O1_MINI);
    map
}

fn init_image_pricing() -> HashMap<&'static str, f64> {
    let mut map = HashMap::new();
    map.insert("gemini-2.5-flash-image", GEMINI_FLASH_IMAGE);
    map.insert("gemini-2.5-flash-image-preview", GEMINI_FLASH_IMAGE);
    map.insert("gemini-3-pro-image-preview", GEMINI_3_PRO_IMAGE);
    map
}

/// Get built-in pricing for a text model.
pub fn get_pricing(model_id: &str) -> Option<ModelPricing> {
    TEXT_PRICING
        .get_or_init(init_text_pricing)
        .get(model_id)
        .copied()
}

/// Get the built-in per-image price for an image model.
pub fn get_image_price(model_id: &str) -> Option<f64> {
    IMAGE_PRICING
        .get_or_init(init_image_pricing)
        .get(model_id)
        .copied()
}

/// Price lookups with optional per-model overrides on top of the built-in table.
#[derive(Debug, Clone, Default)]
pub struct PricingTable {
    text_overrides: HashMap<String, ModelPricing>,
    image_overrides: HashMap<String, f64>,
}

impl PricingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text_price(mut self, model: impl Into<String>, pricing: ModelPricing) -> Self {
        self.text_overrides.insert(model.into(), pricing);
        self
    }

    pub fn with_image_price(mut self, model: impl Into<String>, usd_per_image: f64) -> Self {
        self.image_overrides.insert(model.into(), usd_per_image);
        self
    }

    pub fn text(&self, model: &str) -> ModelPricing {
        self.text_overrides
            .get(model)
            .copied()
            .or_else(|| get_pricing(model))
            .unwrap_or_else(|| {
                tracing::debug!(model, "no text pricing for model; using default");
                DEFAULT_TEXT_PRICING
            })
    }

    pub fn image(&self, model: &str) -> f64 {
        self.image_overrides
            .get(model)
            .copied()
            .or_else(|| get_image_price(model))
            .unwrap_or(DEFAULT_IMAGE_PRICE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_cost() {
        // 1M input tokens of gpt-4o-mini = $0.15, 1M output = $0.60
        let p = get_pricing("gpt-4o-mini").unwrap();
        assert!((p.input_cost(1_000_000) - 0.15).abs() < 1e-12);
        assert!((p.output_cost(1_000_000) - 0.60).abs() < 1e-12);
        assert!((p.input_cost(2_000) - 0.0003).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_model_uses_default() {
        let table = PricingTable::new();
        assert_eq!(table.text("mystery-model"), DEFAULT_TEXT_PRICING);
        assert_eq!(table.image("mystery-image"), DEFAULT_IMAGE_PRICE);
    }

    #[test]
    fn test_overrides_take_precedence() {
        let table = PricingTable::new()
            .with_text_price("gpt-4o-mini", ModelPricing::new(1.0, 2.0))
            .with_image_price("gemini-2.5-flash-image", 0.5);
        assert_eq!(table.text("gpt-4o-mini"), ModelPricing::new(1.0, 2.0));
        assert_eq!(table.image("gemini-2.5-flash-image"), 0.5);
        assert_eq!(table.text("gpt-4o"), GPT_4O);
    }
}
