//! Prompt templates for the review stages.
//!
//! Templates use `{{name}}` placeholders. Stage configs may override either
//! half of a template; overrides are rendered with the same variables.
//! Unknown placeholders render as empty strings.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::personality::Personality;
use crate::pipeline::CompletedMatch;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([a-z_]+)\s*\}\}").expect("placeholder regex is valid")
});

/// Variables available to a template.
#[derive(Debug, Clone, Default)]
pub struct PromptVars(BTreeMap<&'static str, String>);

impl PromptVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.0.insert(key, value.into());
        self
    }

    pub fn set_opt(self, key: &'static str, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.set(key, v),
            None => self,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

pub fn render(template: &str, vars: &PromptVars) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            vars.get(&caps[1]).unwrap_or_default().to_string()
        })
        .trim()
        .to_string()
}

/// Rendered prompt ready for a stage call.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptInstance {
    pub system: Option<String>,
    pub user: String,
}

#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    pub slug: &'static str,
    pub system: &'static str,
    pub user: &'static str,
}

impl PromptTemplate {
    /// Render with optional per-stage overrides. A blank system prompt is dropped.
    pub fn render(
        &self,
        system_override: Option<&str>,
        user_override: Option<&str>,
        vars: &PromptVars,
    ) -> PromptInstance {
        let system = render(system_override.unwrap_or(self.system), vars);
        let user = render(user_override.unwrap_or(self.user), vars);
        PromptInstance {
            system: (!system.is_empty()).then_some(system),
            user,
        }
    }
}

// =============================================================================
// Stage templates
// =============================================================================

const ANALYST_SYSTEM: &str = r#"You are a League of Legends analyst. You read raw match data and write compact, factual notes for a reviewer who will turn them into prose. No opinions, no filler."#;

pub const TIMELINE_SUMMARY: PromptTemplate = PromptTemplate {
    slug: "timeline_summary",
    system: ANALYST_SYSTEM,
    user: r#"Below is a match timeline, one line per minute: `[MM:SS] <events>`.
The player of interest is {{player_name}} on {{champion}}.

Summarize the key moments in chronological order: kills and deaths involving the player, objectives, turning points. Use timestamps.

<timeline>
{{timeline}}
</timeline>"#,
};

pub const TIMELINE_CHUNK: PromptTemplate = PromptTemplate {
    slug: "timeline_chunk",
    system: ANALYST_SYSTEM,
    user: r#"Below is one segment ({{time_range}}) of a longer match timeline, one line per minute.
The player of interest is {{player_name}} on {{champion}}.

Summarize only what happens in this segment, in chronological order, with timestamps.

<timeline_segment>
{{timeline}}
</timeline_segment>"#,
};

pub const TIMELINE_AGGREGATE: PromptTemplate = PromptTemplate {
    slug: "timeline_aggregate",
    system: ANALYST_SYSTEM,
    user: r#"These are summaries of consecutive segments of one match, in order.
Merge them into one chronological summary of the whole game. Keep timestamps and drop repetition.

{{segments}}"#,
};

pub const MATCH_SUMMARY: PromptTemplate = PromptTemplate {
    slug: "match_summary",
    system: ANALYST_SYSTEM,
    user: r#"Summarize this finished match from the perspective of {{player_name}} ({{champion}}).
Cover the result, the player's stats against their lane opponent and team, and anything unusual.

<match>
{{raw_match}}
</match>"#,
};

pub const REVIEW_TEXT: PromptTemplate = PromptTemplate {
    slug: "review_text",
    system: r#"You are {{personality_name}}, reviewing a League of Legends game. Stay in character."#,
    user: "{{review_context}}",
};

pub const IMAGE_DESCRIPTION: PromptTemplate = PromptTemplate {
    slug: "image_description",
    system: r#"You write prompts for an image model. One paragraph, concrete and visual, no text or logos in the image."#,
    user: r#"Describe a single illustration for this game review.

<review>
{{review}}
</review>

Art style: {{art_style}}
{{image_prompts}}"#,
};

// =============================================================================
// Builders
// =============================================================================

/// Variables shared by every stage.
pub fn base_vars(game: &CompletedMatch) -> PromptVars {
    PromptVars::new()
        .set("player_name", &game.player_name)
        .set("champion", &game.champion)
        .set("match_facts", game.describe())
}

fn style_card(personality: &Personality) -> Option<String> {
    personality
        .style_card
        .as_ref()
        .and_then(|card| serde_json::to_string_pretty(card).ok())
        .map(|card| format!("Style card:\n{card}"))
}

pub fn personality_vars(vars: PromptVars, personality: &Personality) -> PromptVars {
    vars.set("personality_name", &personality.name)
        .set("instructions", &personality.instructions)
        .set_opt("style_card", style_card(personality).as_deref())
}

/// Default review body: the reviewer's voice, match facts, whichever
/// summaries exist, then the drawn behavior.
pub fn review_context(
    game: &CompletedMatch,
    personality: &Personality,
    match_summary: Option<&str>,
    timeline_summary: Option<&str>,
    behavior: Option<&str>,
) -> String {
    let mut voice = personality.instructions.trim().to_string();
    if let Some(card) = style_card(personality) {
        voice.push_str("\n\n");
        voice.push_str(&card);
    }
    let mut parts = vec![
        format!("<reviewer>\n{voice}\n</reviewer>"),
        format!("<match_facts>\n{}\n</match_facts>", game.describe()),
    ];
    if let Some(summary) = match_summary.filter(|s| !s.trim().is_empty()) {
        parts.push(format!("<match_summary>\n{}\n</match_summary>", summary.trim()));
    }
    if let Some(summary) = timeline_summary.filter(|s| !s.trim().is_empty()) {
        parts.push(format!(
            "<timeline_summary>\n{}\n</timeline_summary>",
            summary.trim()
        ));
    }
    if let Some(behavior) = behavior {
        parts.push(format!("For this review: {}", behavior.trim()));
    }
    parts.push("Write the review now. A few short paragraphs, in character.".to_string());
    parts.join("\n\n")
}

pub fn image_prompt_lines(prompts: &[String]) -> Option<String> {
    if prompts.is_empty() {
        return None;
    }
    Some(
        prompts
            .iter()
            .map(|p| format!("Include: {p}"))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game() -> CompletedMatch {
        CompletedMatch {
            match_id: "EUW1_1".into(),
            player_name: "Faker".into(),
            champion: "Ahri".into(),
            role: Some("MIDDLE".into()),
            win: true,
            kills: 10,
            deaths: 2,
            assists: 7,
            duration_secs: 1_830,
            queue: None,
        }
    }

    #[test]
    fn render_fills_known_and_blanks_unknown() {
        let vars = PromptVars::new().set("a", "x");
        assert_eq!(render("{{a}}-{{ b }}-{{a}}", &vars), "x--x");
    }

    #[test]
    fn blank_system_prompt_is_dropped() {
        let out = REVIEW_TEXT.render(Some("  "), None, &PromptVars::new().set("review_context", "ctx"));
        assert!(out.system.is_none());
        assert_eq!(out.user, "ctx");
    }

    #[test]
    fn user_override_uses_same_vars() {
        let vars = base_vars(&game()).set("timeline", "[00:00] []");
        let out = TIMELINE_SUMMARY.render(None, Some("Just {{champion}}: {{timeline}}"), &vars);
        assert_eq!(out.user, "Just Ahri: [00:00] []");
        assert!(out.system.unwrap().contains("analyst"));
    }

    #[test]
    fn review_context_skips_missing_sections() {
        let p = Personality::new("coach", "Coach", "Be blunt.");
        let ctx = review_context(&game(), &p, Some("stomped lane"), None, Some("mention wards"));
        assert!(ctx.contains("<match_summary>\nstomped lane"));
        assert!(!ctx.contains("<timeline_summary>"));
        assert!(ctx.contains("For this review: mention wards"));
        assert!(ctx.contains("Ahri"));
    }

    #[test]
    fn review_context_carries_instructions_and_style_card() {
        let mut p = Personality::new("coach", "Coach", "Be blunt.");
        p.style_card = Some(serde_json::json!({"summary": "terse"}));
        let vars = personality_vars(PromptVars::new(), &p)
            .set("review_context", review_context(&game(), &p, None, None, None));

        let out = REVIEW_TEXT.render(None, None, &vars);
        assert!(out.system.unwrap().starts_with("You are Coach"));
        assert!(out.user.starts_with("<reviewer>\nBe blunt."));
        assert!(out.user.contains("\"summary\": \"terse\""));

        // A system override does not drop the voice.
        let out = REVIEW_TEXT.render(Some("Keep it short."), None, &vars);
        assert_eq!(out.system.as_deref(), Some("Keep it short."));
        assert!(out.user.contains("Be blunt."));
    }
}
