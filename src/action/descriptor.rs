//! Typed view over a parsed action object.
//!
//! The assistant emits loosely typed JSON: numbers arrive as strings, flags as
//! `0`/`1`, item codes as arrays or delimited text. Everything is normalized
//! here so the resolver only ever sees well-formed preview requests.

use serde_json::{Map, Value, json};

use super::ActionError;
use crate::rpc::{CreationRequest, CreationSeriesRequest, FieldUpdates, SeriesSpec, is_truthy};

pub const DEFAULT_SERIES_COUNT: i64 = 20;
pub const DEFAULT_SERIES_START: i64 = 1;
pub const DEFAULT_SERIES_PAD: i64 = 0;

/// Fields an update action may touch, keyed by accepted alias.
const UPDATE_FIELD_ALIASES: &[(&str, &str)] = &[
    ("name", "item_name"),
    ("item_name", "item_name"),
    ("group", "item_group"),
    ("item_group", "item_group"),
    ("uom", "stock_uom"),
    ("stock_uom", "stock_uom"),
    ("disabled", "disabled"),
    ("description", "description"),
];

// =============================================================================
// KIND
// =============================================================================

/// The resolvable action tags. Anything else is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    ItemCreation,
    ItemCreationSeries,
    ItemDeletion,
    ItemDeletionSeries,
    ItemUpdate,
    ItemUpdateSeries,
}

impl ActionKind {
    pub const ALL: [Self; 6] = [
        Self::ItemCreation,
        Self::ItemCreationSeries,
        Self::ItemDeletion,
        Self::ItemDeletionSeries,
        Self::ItemUpdate,
        Self::ItemUpdateSeries,
    ];

    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::ItemCreation => "preview_item_creation",
            Self::ItemCreationSeries => "preview_item_creation_series",
            Self::ItemDeletion => "preview_item_deletion",
            Self::ItemDeletionSeries => "preview_item_deletion_series",
            Self::ItemUpdate => "preview_item_update",
            Self::ItemUpdateSeries => "preview_item_update_series",
        }
    }

    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.trim();
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    #[must_use]
    pub fn family(self) -> ActionFamily {
        match self {
            Self::ItemCreation | Self::ItemCreationSeries => ActionFamily::Creation,
            Self::ItemDeletion | Self::ItemDeletionSeries => ActionFamily::Deletion,
            Self::ItemUpdate | Self::ItemUpdateSeries => ActionFamily::Update,
        }
    }
}

/// What an apply does, independent of how the preview was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionFamily {
    Creation,
    Deletion,
    Update,
}

impl ActionFamily {
    /// Label for the manual apply control.
    #[must_use]
    pub fn apply_label(self, count: usize) -> String {
        let verb = match self {
            Self::Creation => "Create",
            Self::Deletion => "Delete",
            Self::Update => "Update",
        };
        format!("{verb} Items ({count})")
    }

    #[must_use]
    pub fn done_verb(self) -> &'static str {
        match self {
            Self::Creation => "created",
            Self::Deletion => "deleted",
            Self::Update => "updated",
        }
    }
}

// =============================================================================
// PLAN
// =============================================================================

/// A validated preview request, ready to dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum PreviewPlan {
    Creation(CreationRequest),
    CreationSeries(CreationSeriesRequest),
    DeletionCodes(Vec<String>),
    DeletionSeries(SeriesSpec),
    UpdateCodes { item_codes: Vec<String>, updates: FieldUpdates },
    UpdateSeries { series: SeriesSpec, updates: FieldUpdates },
}

// =============================================================================
// DESCRIPTOR
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ActionDescriptor {
    pub kind: ActionKind,
    pub fields: Map<String, Value>,
}

impl ActionDescriptor {
    /// `None` when the object has no `action` tag or the tag is not resolvable.
    #[must_use]
    pub fn from_map(fields: Map<String, Value>) -> Option<Self> {
        let kind = fields
            .get("action")
            .and_then(Value::as_str)
            .and_then(ActionKind::from_tag)?;
        Some(Self { kind, fields })
    }

    /// Whether the apply step runs without user confirmation.
    ///
    /// Absent or `null` means yes; only `0`, `"0"`, `false` and `"false"`
    /// opt out.
    #[must_use]
    pub fn auto_apply(&self) -> bool {
        match self.fields.get("auto_apply") {
            None | Some(Value::Null) => true,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_none_or(|f| f != 0.0),
            Some(Value::String(s)) => !matches!(s.trim().to_ascii_lowercase().as_str(), "0" | "false"),
            Some(_) => true,
        }
    }

    /// Created items start disabled unless the action says otherwise.
    #[must_use]
    pub fn create_disabled(&self) -> bool {
        match self.fields.get("create_disabled") {
            None | Some(Value::Null) => true,
            Some(value) => is_truthy(value),
        }
    }

    /// Allow-listed field updates, with aliases folded to canonical names.
    #[must_use]
    pub fn updates(&self) -> FieldUpdates {
        let mut out = Map::new();
        let Some(Value::Object(raw)) = self.fields.get("updates") else {
            return FieldUpdates(out);
        };
        for (key, value) in raw {
            let key = key.trim().to_ascii_lowercase();
            let Some((_, field)) = UPDATE_FIELD_ALIASES.iter().find(|(alias, _)| *alias == key) else {
                continue;
            };
            let value = match (*field, value) {
                (_, Value::Null) => continue,
                ("disabled", v) => json!(i32::from(is_truthy(v))),
                (_, Value::String(s)) if s.trim().is_empty() => continue,
                (_, Value::String(s)) => json!(s.trim()),
                (_, v) => v.clone(),
            };
            out.insert((*field).to_string(), value);
        }
        FieldUpdates(out)
    }

    /// Validate the descriptor and build its preview request.
    ///
    /// # Errors
    ///
    /// [`ActionError::MissingField`] for a missing required string,
    /// [`ActionError::MissingItems`] when a deletion or update names neither
    /// codes nor a prefix, and [`ActionError::NoUpdates`] when an update has
    /// no allow-listed field.
    pub fn plan(&self) -> Result<PreviewPlan, ActionError> {
        match self.kind {
            ActionKind::ItemCreation => Ok(PreviewPlan::Creation(CreationRequest {
                raw_text: self.required("raw_text")?,
                item_group: self.required("item_group")?,
                stock_uom: self.required("stock_uom")?,
                use_ai: self.fields.get("use_ai").is_some_and(is_truthy),
                max_items: self.fields.get("max_items").and_then(as_integer),
            })),
            ActionKind::ItemCreationSeries => {
                let item_group = self.required("item_group")?;
                let stock_uom = self.required("stock_uom")?;
                let name_prefix = self.required("name_prefix")?;
                let series = self.series()?.ok_or(ActionError::MissingField("code_prefix"))?;
                Ok(PreviewPlan::CreationSeries(CreationSeriesRequest {
                    item_group,
                    stock_uom,
                    name_prefix,
                    code_prefix: series.code_prefix,
                    count: series.count,
                    start: series.start,
                    pad: series.pad,
                }))
            }
            ActionKind::ItemDeletion => {
                let codes = self.item_codes();
                if !codes.is_empty() {
                    return Ok(PreviewPlan::DeletionCodes(codes));
                }
                self.series()?
                    .map(PreviewPlan::DeletionSeries)
                    .ok_or(ActionError::MissingItems)
            }
            ActionKind::ItemDeletionSeries => self
                .series()?
                .map(PreviewPlan::DeletionSeries)
                .ok_or(ActionError::MissingField("code_prefix")),
            ActionKind::ItemUpdate => {
                let updates = self.non_empty_updates()?;
                let codes = self.item_codes();
                if !codes.is_empty() {
                    return Ok(PreviewPlan::UpdateCodes { item_codes: codes, updates });
                }
                self.series()?
                    .map(|series| PreviewPlan::UpdateSeries { series, updates })
                    .ok_or(ActionError::MissingItems)
            }
            ActionKind::ItemUpdateSeries => {
                let updates = self.non_empty_updates()?;
                let series = self.series()?.ok_or(ActionError::MissingField("code_prefix"))?;
                Ok(PreviewPlan::UpdateSeries { series, updates })
            }
        }
    }

    fn non_empty_updates(&self) -> Result<FieldUpdates, ActionError> {
        let updates = self.updates();
        if updates.is_empty() {
            return Err(ActionError::NoUpdates);
        }
        Ok(updates)
    }

    fn required(&self, key: &'static str) -> Result<String, ActionError> {
        self.text(key).ok_or(ActionError::MissingField(key))
    }

    fn text(&self, key: &str) -> Option<String> {
        match self.fields.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Series spec when a code prefix is present (`code_prefix` or `prefix`).
    fn series(&self) -> Result<Option<SeriesSpec>, ActionError> {
        let Some(code_prefix) = self.text("code_prefix").or_else(|| self.text("prefix")) else {
            return Ok(None);
        };
        Ok(Some(SeriesSpec {
            code_prefix,
            count: self.number_or("count", DEFAULT_SERIES_COUNT),
            start: self.number_or("start", DEFAULT_SERIES_START),
            pad: self.number_or("pad", DEFAULT_SERIES_PAD),
        }))
    }

    fn number_or(&self, key: &str, default: i64) -> i64 {
        self.fields.get(key).and_then(as_integer).unwrap_or(default)
    }

    /// Explicit item codes, deduplicated in first-seen order.
    #[must_use]
    pub fn item_codes(&self) -> Vec<String> {
        let raw: Vec<String> = match self.fields.get("item_codes") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
            Some(Value::String(s)) => s.split([',', ';', '\n']).map(str::to_string).collect(),
            _ => Vec::new(),
        };

        let mut codes: Vec<String> = Vec::with_capacity(raw.len());
        for code in raw {
            let code = code.trim();
            if !code.is_empty() && !codes.iter().any(|c| c == code) {
                codes.push(code.to_string());
            }
        }
        codes
    }
}

/// Integers, integral floats and numeric strings; anything else is `None`.
#[allow(clippy::cast_possible_truncation)]
fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite() && f.fract() == 0.0).map(|f| f as i64))
        }
        _ => None,
    }
}

#[cfg(test)]
#[path = "descriptor_test.rs"]
mod tests;
