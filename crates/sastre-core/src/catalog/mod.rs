// ── Item catalog ──
//
// One static descriptor per configuration item kind. Everything the engine
// needs to know about a kind -- endpoints, identity fields, store location,
// version gating -- lives in its `CatalogEntry`; no per-kind code exists
// anywhere else. Reference extraction and rewriting are generic walkers
// driven by these descriptors.

mod entries;

use std::fmt;
use std::str::FromStr;

use crate::error::TaskError;

pub use entries::CATALOG;

/// Special tag selecting every kind plus certificates and device configs.
pub const TAG_ALL: &str = "all";

/// Human-friendly selector expanding to a set of item kinds.
///
/// The enum order is the *delete* order: dependents first. Pushing walks
/// the same list in reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tag {
    ConfigGroup,
    TemplateDevice,
    TemplateFeature,
    FeatureProfile,
    PolicyVsmart,
    PolicyVedge,
    PolicySecurity,
    PolicyVoice,
    PolicyCustomapp,
    PolicyDefinition,
    PolicyProfile,
    PolicyList,
}

/// All tags in delete order.
pub const TAG_DELETE_ORDER: &[Tag] = &[
    Tag::ConfigGroup,
    Tag::TemplateDevice,
    Tag::TemplateFeature,
    Tag::FeatureProfile,
    Tag::PolicyVsmart,
    Tag::PolicyVedge,
    Tag::PolicySecurity,
    Tag::PolicyVoice,
    Tag::PolicyCustomapp,
    Tag::PolicyDefinition,
    Tag::PolicyProfile,
    Tag::PolicyList,
];

impl Tag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::ConfigGroup => "config_group",
            Tag::TemplateDevice => "template_device",
            Tag::TemplateFeature => "template_feature",
            Tag::FeatureProfile => "feature_profile",
            Tag::PolicyVsmart => "policy_vsmart",
            Tag::PolicyVedge => "policy_vedge",
            Tag::PolicySecurity => "policy_security",
            Tag::PolicyVoice => "policy_voice",
            Tag::PolicyCustomapp => "policy_customapp",
            Tag::PolicyDefinition => "policy_definition",
            Tag::PolicyProfile => "policy_profile",
            Tag::PolicyList => "policy_list",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tag {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TAG_DELETE_ORDER
            .iter()
            .copied()
            .find(|tag| tag.as_str() == s)
            .ok_or_else(|| {
                TaskError::InvalidTag(format!(
                    "\"{s}\" is not a valid tag. Available tags: {TAG_ALL}, {}",
                    tag_options()
                ))
            })
    }
}

/// Comma-separated list of valid tags, for error messages.
pub fn tag_options() -> String {
    TAG_DELETE_ORDER
        .iter()
        .map(Tag::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Expand a user-supplied tag list into a tag set. `all` selects every tag.
pub fn expand_tags<S: AsRef<str>>(tags: &[S]) -> Result<Vec<Tag>, TaskError> {
    if tags.iter().any(|t| t.as_ref() == TAG_ALL) {
        return Ok(TAG_DELETE_ORDER.to_vec());
    }
    let mut selected: Vec<Tag> = Vec::new();
    for tag in tags {
        let parsed = tag.as_ref().parse()?;
        if !selected.contains(&parsed) {
            selected.push(parsed);
        }
    }
    selected.sort();
    Ok(selected)
}

/// The given tag plus every tag its items may reference, in delete order.
///
/// `all` yields the full list. Restore walks this list in reverse so
/// referenced kinds are pushed first.
pub fn ordered_tags(tag: &str) -> Result<Vec<Tag>, TaskError> {
    if tag == TAG_ALL {
        return Ok(TAG_DELETE_ORDER.to_vec());
    }
    let start: Tag = tag.parse()?;
    Ok(TAG_DELETE_ORDER
        .iter()
        .copied()
        .skip_while(|t| *t != start)
        .collect())
}

/// Per-kind descriptor: endpoints, identity fields, store location and
/// version gating. All entries live in the static [`CATALOG`] table.
#[derive(Debug)]
pub struct CatalogEntry {
    pub tag: Tag,
    /// Kind tag, e.g. `policy_list.site`.
    pub kind: &'static str,
    /// Human description used in log messages, e.g. `site list`.
    pub info: &'static str,
    /// Endpoint returning the kind index (list of summaries).
    pub index_path: &'static str,
    /// Endpoint for single-item GET; the item id is appended.
    pub get_path: &'static str,
    /// Endpoint for POST (create).
    pub post_path: &'static str,
    /// Endpoint for PUT and DELETE; the item id is appended.
    pub mutate_path: &'static str,
    /// Field carrying the controller-assigned id.
    pub id_field: &'static str,
    /// Field carrying the item name.
    pub name_field: &'static str,
    /// Directory for this kind inside a workdir.
    pub store_dir: &'static str,
    /// Minimum controller version; `None` means always available.
    pub min_version: Option<&'static str>,
    /// Volatile fields excluded from body comparison.
    pub skip_cmp_fields: &'static [&'static str],
    /// Fields stripped from POST payloads on top of the standard set.
    pub post_filtered_fields: &'static [&'static str],
}

impl CatalogEntry {
    /// Available on a controller running `version`?
    pub fn is_supported(&self, version: &str) -> bool {
        match self.min_version {
            Some(min) => !is_version_newer(version, min),
            None => true,
        }
    }

    pub fn item_get_path(&self, item_id: &str) -> String {
        format!("{}/{}", self.get_path, item_id)
    }

    pub fn item_put_path(&self, item_id: &str) -> String {
        format!("{}/{}", self.mutate_path, item_id)
    }

    pub fn item_delete_path(&self, item_id: &str) -> String {
        format!("{}/{}", self.mutate_path, item_id)
    }

    /// Relative store path of this kind's index file.
    pub fn index_file(&self) -> String {
        format!("{}/index.json", self.store_dir)
    }
}

/// Catalog entries for one tag, filtered by controller version when one is
/// given. Entries gated behind a newer version are silently unavailable.
pub fn entries_for_tag(
    tag: Tag,
    version: Option<&str>,
) -> impl Iterator<Item = &'static CatalogEntry> + '_ {
    CATALOG.iter().filter(move |entry| {
        entry.tag == tag
            && match version {
                Some(v) => entry.is_supported(v),
                None => true,
            }
    })
}

/// Look up a catalog entry by its kind tag.
pub fn entry_for_kind(kind: &str) -> Option<&'static CatalogEntry> {
    CATALOG.iter().find(|entry| entry.kind == kind)
}

/// Whether `version_2` is newer than `version_1`.
///
/// Only the first two fields are compared: maintenance-release differences
/// do not change REST payload shapes. Development builds may look like
/// `20.1.999-98`.
pub fn is_version_newer(version_1: &str, version_2: &str) -> bool {
    parse_version(version_2) > parse_version(version_1)
}

fn parse_version(version: &str) -> (u32, u32) {
    let mut fields = version
        .replace('-', ".")
        .split('.')
        .map(|f| f.parse::<u32>().unwrap_or(0))
        .collect::<Vec<_>>()
        .into_iter();
    (fields.next().unwrap_or(0), fields.next().unwrap_or(0))
}
