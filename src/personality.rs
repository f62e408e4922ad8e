//! Reviewer personalities and art styles, loaded from a directory.
//!
//! Layout:
//!
//! ```text
//! <dir>/personalities/<id>.json
//! <dir>/art-styles/<id>.json
//! ```
//!
//! New entries need no code changes. Files that fail to parse are skipped.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unknown personality: {0}")]
    UnknownPersonality(String),
}

/// A weighted flavor instruction. Weights are percentages of a 0..100 draw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Behavior {
    pub text: String,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Personality {
    pub id: String,
    pub name: String,
    pub instructions: String,
    /// Free-form style profile (tone, vocabulary, how to mimic).
    #[serde(default)]
    pub style_card: Option<Value>,
    #[serde(default)]
    pub behaviors: Vec<Behavior>,
    #[serde(default)]
    pub image_prompts: Vec<String>,
}

impl Personality {
    pub fn new(id: impl Into<String>, name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            instructions: instructions.into(),
            style_card: None,
            behaviors: Vec::new(),
            image_prompts: Vec::new(),
        }
    }

    pub fn with_behavior(mut self, text: impl Into<String>, weight: f64) -> Self {
        self.behaviors.push(Behavior {
            text: text.into(),
            weight,
        });
        self
    }

    pub fn with_image_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.image_prompts.push(prompt.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtStyle {
    pub id: String,
    pub description: String,
}

/// Registry of personalities (by id) and art styles.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    personalities: BTreeMap<String, Personality>,
    art_styles: Vec<ArtStyle>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let dir = dir.as_ref();
        let mut catalog = Self::new();
        for p in load_json_files::<Personality>(&dir.join("personalities"))? {
            catalog.insert_personality(p);
        }
        for s in load_json_files::<ArtStyle>(&dir.join("art-styles"))? {
            catalog.insert_art_style(s);
        }
        tracing::debug!(
            dir = %dir.display(),
            personalities = catalog.personalities.len(),
            art_styles = catalog.art_styles.len(),
            "catalog loaded"
        );
        Ok(catalog)
    }

    pub fn insert_personality(&mut self, personality: Personality) {
        self.personalities.insert(personality.id.clone(), personality);
    }

    pub fn insert_art_style(&mut self, style: ArtStyle) {
        self.art_styles.push(style);
    }

    pub fn personality(&self, id: &str) -> Result<&Personality, CatalogError> {
        self.personalities
            .get(id)
            .ok_or_else(|| CatalogError::UnknownPersonality(id.to_string()))
    }

    pub fn personalities(&self) -> impl Iterator<Item = &Personality> {
        self.personalities.values()
    }

    pub fn art_styles(&self) -> &[ArtStyle] {
        &self.art_styles
    }
}

fn load_json_files<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>, CatalogError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let io_err = |source| CatalogError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(io_err)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut out = Vec::with_capacity(paths.len());
    for path in paths {
        let raw = std::fs::read_to_string(&path).map_err(|source| CatalogError::Io {
            path: path.clone(),
            source,
        })?;
        match serde_json::from_str::<T>(&raw) {
            Ok(item) => out.push(item),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping malformed catalog file"),
        }
    }
    Ok(out)
}

/// Draw `u` in `[0, 100)` and return the behavior whose cumulative weight
/// bucket contains it. `None` when `u` falls past the total weight.
pub fn draw_behavior<'a, R: Rng + ?Sized>(behaviors: &'a [Behavior], rng: &mut R) -> Option<&'a Behavior> {
    if behaviors.is_empty() {
        return None;
    }
    let u: f64 = rng.gen_range(0.0..100.0);
    pick_behavior(behaviors, u)
}

fn pick_behavior(behaviors: &[Behavior], u: f64) -> Option<&Behavior> {
    let mut cumulative = 0.0;
    for behavior in behaviors {
        cumulative += behavior.weight.max(0.0);
        if u < cumulative {
            return Some(behavior);
        }
    }
    None
}

pub fn pick_art_style<'a, R: Rng + ?Sized>(styles: &'a [ArtStyle], rng: &mut R) -> Option<&'a ArtStyle> {
    styles.choose(rng)
}

/// Up to `max` distinct prompts, in random order.
pub fn pick_image_prompts<R: Rng + ?Sized>(prompts: &[String], max: usize, rng: &mut R) -> Vec<String> {
    prompts.choose_multiple(rng, max).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn behaviors() -> Vec<Behavior> {
        vec![
            Behavior {
                text: "a".into(),
                weight: 30.0,
            },
            Behavior {
                text: "b".into(),
                weight: 50.0,
            },
        ]
    }

    #[test]
    fn test_cumulative_buckets() {
        let b = behaviors();
        assert_eq!(pick_behavior(&b, 0.0).unwrap().text, "a");
        assert_eq!(pick_behavior(&b, 29.99).unwrap().text, "a");
        assert_eq!(pick_behavior(&b, 30.0).unwrap().text, "b");
        assert_eq!(pick_behavior(&b, 79.99).unwrap().text, "b");
        assert!(pick_behavior(&b, 80.0).is_none());
    }

    #[test]
    fn test_draw_is_independent_per_call() {
        let b = vec![
            Behavior {
                text: "x".into(),
                weight: 50.0,
            },
            Behavior {
                text: "y".into(),
                weight: 50.0,
            },
        ];
        let mut rng = StdRng::seed_from_u64(7);
        let draws: Vec<&str> = (0..64)
            .map(|_| draw_behavior(&b, &mut rng).unwrap().text.as_str())
            .collect();
        assert!(draws.contains(&"x"));
        assert!(draws.contains(&"y"));
    }

    #[test]
    fn test_pick_image_prompts_caps_count() {
        let prompts: Vec<String> = (0..5).map(|i| format!("p{i}")).collect();
        let mut rng = StdRng::seed_from_u64(1);
        let picked = pick_image_prompts(&prompts, 2, &mut rng);
        assert_eq!(picked.len(), 2);
        assert_ne!(picked[0], picked[1]);
        assert!(pick_image_prompts(&[], 2, &mut rng).is_empty());
    }

    #[test]
    fn test_load_dir_skips_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let pdir = dir.path().join("personalities");
        std::fs::create_dir_all(&pdir).unwrap();
        std::fs::write(
            pdir.join("coach.json"),
            r#"{"id":"coach","name":"Coach","instructions":"Be blunt.","behaviors":[{"text":"yell","weight":10}]}"#,
        )
        .unwrap();
        std::fs::write(pdir.join("broken.json"), "{not json").unwrap();
        let sdir = dir.path().join("art-styles");
        std::fs::create_dir_all(&sdir).unwrap();
        std::fs::write(sdir.join("ink.json"), r#"{"id":"ink","description":"ink wash"}"#).unwrap();

        let catalog = Catalog::load_dir(dir.path()).unwrap();
        assert_eq!(catalog.personality("coach").unwrap().behaviors.len(), 1);
        assert_eq!(catalog.personalities().count(), 1);
        assert_eq!(catalog.art_styles().len(), 1);
        assert!(matches!(
            catalog.personality("nobody"),
            Err(CatalogError::UnknownPersonality(_))
        ));
    }
}
