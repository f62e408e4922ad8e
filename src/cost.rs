//! Cost calculation from completed traces.
//!
//! All amounts are USD. `CostBreakdown` can only be built through
//! [`CostBreakdown::new`], which derives the total; deserialized values are
//! re-derived the same way.

use std::iter::Sum;
use std::ops::Add;

use serde::{Deserialize, Serialize};

use crate::gateway::PricingTable;
use crate::trace::{ImageGenerationTrace, PipelineTraces, StageTrace};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawCostBreakdown")]
pub struct CostBreakdown {
    text_input_cost: f64,
    text_output_cost: f64,
    image_cost: f64,
    total_cost: f64,
}

#[derive(Deserialize)]
struct RawCostBreakdown {
    #[serde(default)]
    text_input_cost: f64,
    #[serde(default)]
    text_output_cost: f64,
    #[serde(default)]
    image_cost: f64,
}

impl From<RawCostBreakdown> for CostBreakdown {
    fn from(raw: RawCostBreakdown) -> Self {
        Self::new(raw.text_input_cost, raw.text_output_cost, raw.image_cost)
    }
}

fn non_negative(v: f64) -> f64 {
    if v.is_finite() && v > 0.0 {
        v
    } else {
        0.0
    }
}

impl CostBreakdown {
    /// Negative or non-finite components are clamped to zero.
    pub fn new(text_input_cost: f64, text_output_cost: f64, image_cost: f64) -> Self {
        let text_input_cost = non_negative(text_input_cost);
        let text_output_cost = non_negative(text_output_cost);
        let image_cost = non_negative(image_cost);
        Self {
            text_input_cost,
            text_output_cost,
            image_cost,
            total_cost: text_input_cost + text_output_cost + image_cost,
        }
    }

    pub fn text_input_cost(&self) -> f64 {
        self.text_input_cost
    }

    pub fn text_output_cost(&self) -> f64 {
        self.text_output_cost
    }

    pub fn image_cost(&self) -> f64 {
        self.image_cost
    }

    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }
}

impl Add for CostBreakdown {
    type Output = CostBreakdown;

    fn add(self, rhs: Self) -> Self {
        Self::new(
            self.text_input_cost + rhs.text_input_cost,
            self.text_output_cost + rhs.text_output_cost,
            self.image_cost + rhs.image_cost,
        )
    }
}

impl Sum for CostBreakdown {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

impl<'a> Sum<&'a CostBreakdown> for CostBreakdown {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

/// Cost of one stage invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageCost {
    pub stage: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost: CostBreakdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineCostBreakdown {
    pub stages: Vec<StageCost>,
    pub total: CostBreakdown,
}

#[derive(Debug, Clone, Default)]
pub struct CostCalculator {
    pricing: PricingTable,
}

impl CostCalculator {
    pub fn new(pricing: PricingTable) -> Self {
        Self { pricing }
    }

    /// Missing token counts count as zero.
    pub fn stage_cost(&self, stage: impl Into<String>, trace: &StageTrace) -> StageCost {
        let model = trace.model.model();
        let pricing = self.pricing.text(model);
        let input_tokens = trace.tokens_prompt.unwrap_or(0);
        let output_tokens = trace.tokens_completion.unwrap_or(0);
        StageCost {
            stage: stage.into(),
            model: model.to_string(),
            input_tokens,
            output_tokens,
            cost: CostBreakdown::new(
                pricing.input_cost(input_tokens),
                pricing.output_cost(output_tokens),
                0.0,
            ),
        }
    }

    pub fn image_cost(&self, trace: &ImageGenerationTrace) -> f64 {
        if trace.image_generated {
            self.pricing.image(&trace.model)
        } else {
            0.0
        }
    }

    pub fn pipeline_cost(&self, traces: &PipelineTraces) -> PipelineCostBreakdown {
        let mut stages: Vec<StageCost> = traces
            .text_traces()
            .into_iter()
            .map(|(label, trace)| self.stage_cost(label, trace))
            .collect();

        if let Some(image) = &traces.image_generation {
            stages.push(StageCost {
                stage: "image_generation".to_string(),
                model: image.model.clone(),
                input_tokens: 0,
                output_tokens: 0,
                cost: CostBreakdown::new(0.0, 0.0, self.image_cost(image)),
            });
        }

        let total = stages.iter().map(|s| &s.cost).sum();
        PipelineCostBreakdown { stages, total }
    }
}
