//! Grid options.
//!
//! [`GridOptions`] holds the serialisable part of the row model
//! configuration. Options can be built in code or loaded from JSON/TOML;
//! every field has a default so partial documents are accepted.
//!
//! ```
//! use horizon_grid::GridOptions;
//!
//! let options = GridOptions::from_json_str(r#"{ "groupIncludeFooter": true }"#).unwrap();
//! assert!(options.group_include_footer);
//! assert_eq!(options.row_height, 25.0);
//! ```

use std::path::Path;

use horizon_grid_core::logging::targets;
use serde::{Deserialize, Serialize};

use crate::error::{GridError, Result};
use crate::sort::NullsPosition;

/// Where group footers are placed relative to the group's children.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FooterPosition {
    /// Footer row follows the group's children.
    #[default]
    Bottom,
    /// Footer row precedes the group's children.
    Top,
}

/// Row model options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GridOptions {
    /// Derive the tree from explicit row paths instead of group columns.
    pub tree_data: bool,
    /// Create a footer row for each group.
    pub group_include_footer: bool,
    /// Placement of group footers.
    pub group_footer_position: FooterPosition,
    /// Create a grand total footer after all rows.
    pub group_include_total_footer: bool,
    /// Levels expanded on group creation. `-1` expands all levels.
    pub group_default_expanded: i32,
    /// Selecting a group selects its filtered leaves.
    pub group_selects_children: bool,
    /// Test group rows against the filter using their aggregated values.
    pub group_agg_filtering: bool,
    /// Pivot mode.
    pub pivot_mode: bool,
    /// Separator between pivot keys in generated column ids.
    pub pivot_key_separator: String,
    /// Default row height used for `row_top` assignment.
    pub row_height: f64,
    /// Where nulls go when sorting.
    pub nulls_position: NullsPosition,
    /// Rows per block in the server-side row model.
    pub server_side_block_size: usize,
    /// Skip aggregation of the root node.
    pub suppress_agg_at_root_level: bool,
}

impl Default for GridOptions {
    fn default() -> Self {
        Self {
            tree_data: false,
            group_include_footer: false,
            group_footer_position: FooterPosition::Bottom,
            group_include_total_footer: false,
            group_default_expanded: 0,
            group_selects_children: false,
            group_agg_filtering: false,
            pivot_mode: false,
            pivot_key_separator: "_".to_string(),
            row_height: 25.0,
            nulls_position: NullsPosition::Last,
            server_side_block_size: 100,
            suppress_agg_at_root_level: false,
        }
    }
}

impl GridOptions {
    /// Parse options from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let options: Self =
            serde_json::from_str(json).map_err(|e| GridError::config(e.to_string()))?;
        options.validated()
    }

    /// Parse options from a TOML document.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let options: Self = toml::from_str(toml).map_err(|e| GridError::config(e.to_string()))?;
        options.validated()
    }

    /// Load options from a `.json` or `.toml` file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| GridError::io(path, e))?;
        tracing::debug!(target: targets::CONFIG, path = %path.display(), "loading grid options");

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&content),
            Some("toml") => Self::from_toml_str(&content),
            other => Err(GridError::config(format!(
                "unsupported options file extension {:?}",
                other.unwrap_or("")
            ))),
        }
    }

    /// Serialise to pretty JSON.
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| GridError::config(e.to_string()))
    }

    /// Serialise to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| GridError::config(e.to_string()))
    }

    /// Whether a group at `level` starts out expanded.
    pub fn is_expanded_by_default(&self, level: i32) -> bool {
        self.group_default_expanded == -1 || level < self.group_default_expanded
    }

    fn validated(self) -> Result<Self> {
        if self.server_side_block_size == 0 {
            return Err(GridError::config("serverSideBlockSize must be at least 1"));
        }
        if !(self.row_height.is_finite() && self.row_height > 0.0) {
            return Err(GridError::config("rowHeight must be a positive number"));
        }
        Ok(self)
    }
}
