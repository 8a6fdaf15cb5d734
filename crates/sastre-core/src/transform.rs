// ── Name transformer ──
//
// Name templates splice sections of an original item name into a new one:
// `{name}` expands to the whole name, `{name <regex>}` to the concatenated
// capturing groups of <regex> applied to the name (empty on no match).
// Recipes add selection regexes and an explicit old->new map consulted
// before the template.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::catalog::{Tag, TAG_ALL};
use crate::error::TaskError;

fn substitution_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{name(?:\s+(.*?))?\}").unwrap())
}

enum Part {
    Literal(String),
    Whole,
    Extract(Regex),
}

/// A parsed name template, e.g. `migrated_{name}` or
/// `{name (G_.+)_184_.+}_201_{name G.+_184_(.+)}`.
pub struct NameTemplate {
    source: String,
    parts: Vec<Part>,
}

impl NameTemplate {
    /// Parse and validate a template. The template must contain at least
    /// one `{name ...}` substitution and every embedded regex must have at
    /// least one capturing group.
    pub fn parse(template: &str) -> Result<Self, TaskError> {
        let mut parts = Vec::new();
        let mut cursor = 0;
        for caps in substitution_regex().captures_iter(template) {
            let whole = caps.get(0).ok_or_else(|| {
                TaskError::InvalidArg("name-regex parse failed".into())
            })?;
            if whole.start() > cursor {
                parts.push(Part::Literal(template[cursor..whole.start()].to_owned()));
            }
            match caps.get(1) {
                None => parts.push(Part::Whole),
                Some(raw) => {
                    let regex = Regex::new(raw.as_str()).map_err(|_| {
                        TaskError::InvalidArg(format!(
                            "name-regex contains an invalid regular expression: {}",
                            raw.as_str()
                        ))
                    })?;
                    if regex.captures_len() < 2 {
                        return Err(TaskError::InvalidArg(
                            "name-regex regular expression must include at least one \
                             capturing group"
                                .into(),
                        ));
                    }
                    parts.push(Part::Extract(regex));
                }
            }
            cursor = whole.end();
        }

        if !parts.iter().any(|p| matches!(p, Part::Whole | Part::Extract(_))) {
            return Err(TaskError::InvalidArg(
                "name-regex must include the {name} variable".into(),
            ));
        }
        if cursor < template.len() {
            parts.push(Part::Literal(template[cursor..].to_owned()));
        }

        Ok(Self {
            source: template.to_owned(),
            parts,
        })
    }

    /// Produce the transformed name.
    pub fn apply(&self, name: &str) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Whole => out.push_str(name),
                Part::Extract(regex) => {
                    if let Some(caps) = regex.captures(name) {
                        for group in caps.iter().skip(1).flatten() {
                            out.push_str(group.as_str());
                        }
                    }
                    // No match: the substitution expands to nothing.
                }
            }
        }
        out
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

// ── Recipes ─────────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecipeNameTemplate {
    /// Only transform names matching this regex.
    pub regex: Option<String>,
    /// Only transform names NOT matching this regex.
    pub not_regex: Option<String>,
    pub name_regex: String,
}

/// Transform recipe: which items to rename and how.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformRecipe {
    pub tag: String,
    #[serde(default)]
    pub name_template: Option<RecipeNameTemplate>,
    #[serde(default)]
    pub name_map: Option<BTreeMap<String, String>>,
    /// Rename in place (true) or keep the original and add a copy (false).
    #[serde(default = "default_true")]
    pub replace_source: bool,
}

impl TransformRecipe {
    pub fn from_yaml(text: &str) -> Result<Self, TaskError> {
        serde_yaml::from_str(text)
            .map_err(|e| TaskError::InvalidRecipe(format!("recipe YAML error: {e}")))
    }

    /// Built-in `rename` recipe: transform in place.
    pub fn rename(
        tag: &str,
        regex: Option<String>,
        not_regex: Option<String>,
        name_regex: &str,
    ) -> Self {
        Self {
            tag: tag.to_owned(),
            name_template: Some(RecipeNameTemplate {
                regex,
                not_regex,
                name_regex: name_regex.to_owned(),
            }),
            name_map: None,
            replace_source: true,
        }
    }

    /// Built-in `copy` recipe: keep the original, add a renamed duplicate.
    pub fn copy(
        tag: &str,
        regex: Option<String>,
        not_regex: Option<String>,
        name_regex: &str,
    ) -> Self {
        Self {
            replace_source: false,
            ..Self::rename(tag, regex, not_regex, name_regex)
        }
    }
}

/// A validated recipe, ready to evaluate names.
pub struct NameRewriter {
    /// `None` selects every tag.
    tag: Option<Tag>,
    selector: Option<(Regex, bool)>,
    template: Option<NameTemplate>,
    name_map: BTreeMap<String, String>,
    pub replace_source: bool,
}

impl NameRewriter {
    pub fn from_recipe(recipe: &TransformRecipe) -> Result<Self, TaskError> {
        let tag = if recipe.tag == TAG_ALL {
            None
        } else {
            Some(
                recipe
                    .tag
                    .parse::<Tag>()
                    .map_err(|e| TaskError::InvalidRecipe(e.to_string()))?,
            )
        };

        if recipe.name_template.is_none() && recipe.name_map.is_none() {
            return Err(TaskError::InvalidRecipe(
                "at least one of \"name_map\" or \"name_template\" is required".into(),
            ));
        }

        let (selector, template) = match &recipe.name_template {
            None => (None, None),
            Some(nt) => {
                if nt.regex.is_some() && nt.not_regex.is_some() {
                    return Err(TaskError::InvalidRecipe(
                        "\"regex\" and \"not_regex\" are mutually exclusive".into(),
                    ));
                }
                let selector = match (&nt.regex, &nt.not_regex) {
                    (Some(re), _) => Some((compile_recipe_regex(re)?, false)),
                    (None, Some(re)) => Some((compile_recipe_regex(re)?, true)),
                    (None, None) => None,
                };
                let template = NameTemplate::parse(&nt.name_regex)
                    .map_err(|e| TaskError::InvalidRecipe(e.to_string()))?;
                (selector, Some(template))
            }
        };

        Ok(Self {
            tag,
            selector,
            template,
            name_map: recipe.name_map.clone().unwrap_or_default(),
            replace_source: recipe.replace_source,
        })
    }

    /// New name for an item, or `None` when the recipe does not select it.
    /// The explicit map wins over the template.
    pub fn new_name(&self, name: &str, tag: Tag) -> Option<String> {
        if self.tag.is_some_and(|t| t != tag) {
            return None;
        }
        if let Some(mapped) = self.name_map.get(name) {
            return Some(mapped.clone());
        }
        let template = self.template.as_ref()?;
        if let Some((regex, inverse)) = &self.selector {
            if regex.is_match(name) == *inverse {
                return None;
            }
        }
        Some(template.apply(name))
    }
}

fn compile_recipe_regex(pattern: &str) -> Result<Regex, TaskError> {
    Regex::new(pattern)
        .map_err(|_| TaskError::InvalidRecipe(format!("invalid regular expression: {pattern}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_name_substitution() {
        let template = NameTemplate::parse("migrated_{name}").unwrap();
        assert_eq!(template.apply("DC_Template"), "migrated_DC_Template");
    }

    #[test]
    fn capture_group_splicing() {
        let template =
            NameTemplate::parse("{name (G_.+)_184_.+}_201_{name G.+_184_(.+)}").unwrap();
        assert_eq!(
            template.apply("G_Branch_184_Single_cE4451-X_2xWAN_DHCP_L2_v01"),
            "G_Branch_201_Single_cE4451-X_2xWAN_DHCP_L2_v01"
        );
    }

    #[test]
    fn non_matching_substitution_expands_empty() {
        let template =
            NameTemplate::parse("{name (G_.+)_184_.+}_201_{name G.+_184_(.+)}").unwrap();
        assert_eq!(template.apply("Unrelated_Name"), "_201_");
    }

    #[test]
    fn template_without_name_variable_is_rejected() {
        assert!(matches!(
            NameTemplate::parse("static_name"),
            Err(TaskError::InvalidArg(_))
        ));
    }

    #[test]
    fn regex_without_capture_group_is_rejected() {
        assert!(matches!(
            NameTemplate::parse("{name G_.+}"),
            Err(TaskError::InvalidArg(_))
        ));
    }

    #[test]
    fn recipe_map_wins_over_template() {
        let recipe = TransformRecipe::from_yaml(
            "tag: template_feature\n\
             name_template:\n\
             \x20 name_regex: \"{name}_v01\"\n\
             name_map:\n\
             \x20 Logging_Template_cEdge: Logging_Template_v01\n",
        )
        .unwrap();
        let rewriter = NameRewriter::from_recipe(&recipe).unwrap();

        assert_eq!(
            rewriter.new_name("Logging_Template_cEdge", Tag::TemplateFeature),
            Some("Logging_Template_v01".into())
        );
        assert_eq!(
            rewriter.new_name("Other", Tag::TemplateFeature),
            Some("Other_v01".into())
        );
        // Wrong tag: not selected.
        assert_eq!(rewriter.new_name("Other", Tag::PolicyList), None);
    }

    #[test]
    fn recipe_selector_regexes() {
        let recipe =
            TransformRecipe::rename("all", Some("^DC".into()), None, "{name}_renamed");
        let rewriter = NameRewriter::from_recipe(&recipe).unwrap();
        assert_eq!(
            rewriter.new_name("DC_List", Tag::PolicyList),
            Some("DC_List_renamed".into())
        );
        assert_eq!(rewriter.new_name("Branch_List", Tag::PolicyList), None);

        let recipe =
            TransformRecipe::rename("all", None, Some("^DC".into()), "{name}_renamed");
        let rewriter = NameRewriter::from_recipe(&recipe).unwrap();
        assert_eq!(rewriter.new_name("DC_List", Tag::PolicyList), None);
        assert_eq!(
            rewriter.new_name("Branch_List", Tag::PolicyList),
            Some("Branch_List_renamed".into())
        );
    }

    #[test]
    fn recipe_requires_map_or_template() {
        let recipe = TransformRecipe::from_yaml("tag: policy_list\n").unwrap();
        assert!(matches!(
            NameRewriter::from_recipe(&recipe),
            Err(TaskError::InvalidRecipe(_))
        ));
    }

    #[test]
    fn recipe_rejects_unknown_tag_and_bad_yaml() {
        let recipe = TransformRecipe::from_yaml(
            "tag: policy_bogus\nname_map:\n  a: b\n",
        )
        .unwrap();
        assert!(matches!(
            NameRewriter::from_recipe(&recipe),
            Err(TaskError::InvalidRecipe(_))
        ));

        assert!(matches!(
            TransformRecipe::from_yaml("tag: [unclosed"),
            Err(TaskError::InvalidRecipe(_))
        ));
    }

    #[test]
    fn recipe_mutex_selectors_rejected() {
        let recipe = TransformRecipe {
            tag: "all".into(),
            name_template: Some(RecipeNameTemplate {
                regex: Some("a".into()),
                not_regex: Some("b".into()),
                name_regex: "{name}".into(),
            }),
            name_map: None,
            replace_source: true,
        };
        assert!(matches!(
            NameRewriter::from_recipe(&recipe),
            Err(TaskError::InvalidRecipe(_))
        ));
    }
}
