use crate::errors::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Alias of the milestone an Elber anchor is centred on
pub const ELBER_CENTRE_ALIAS: usize = 2;

/// A boundary between two anchors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    /// Index of this milestone, unique across the model
    pub index: usize,
    /// Index of this milestone within its owning anchor
    pub alias_index: usize,
    /// Index of the anchor on the other side of this milestone
    pub neighbor_anchor_index: usize,
    /// Geometric parameters of the milestone surface, like `"radius"`
    #[serde(default)]
    pub variables: BTreeMap<String, f64>,
}

impl Milestone {
    /// Create a milestone with no geometric parameters
    pub fn new(index: usize, alias_index: usize, neighbor_anchor_index: usize) -> Self {
        Self {
            index,
            alias_index,
            neighbor_anchor_index,
            variables: BTreeMap::new(),
        }
    }

    /// Attach a geometric parameter to this milestone
    pub fn with_variable(mut self, name: &str, value: f64) -> Self {
        self.variables.insert(name.to_string(), value);
        self
    }
}

/// A Voronoi cell within which unconstrained dynamics occurs between milestone crossings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    /// Position of this anchor in the model
    pub index: usize,
    /// Human readable label
    #[serde(default)]
    pub name: String,
    /// Bounding milestones
    pub milestones: Vec<Milestone>,
    /// Whether dynamics are run in this anchor
    #[serde(default = "default_true")]
    pub md: bool,
    /// Whether this anchor is an end state for MFPT and rate calculations
    #[serde(default)]
    pub endstate: bool,
    /// Whether this anchor is the bulk state
    #[serde(default)]
    pub bulkstate: bool,
}

fn default_true() -> bool {
    true
}

impl Anchor {
    /// Create an anchor with dynamics and no state flags
    pub fn new(index: usize, milestones: Vec<Milestone>) -> Self {
        Self {
            index,
            name: format!("anchor_{}", index),
            milestones,
            md: true,
            endstate: false,
            bulkstate: false,
        }
    }

    /// Global milestone index of the milestone with this alias
    pub fn id_from_alias(&self, alias: usize) -> Option<usize> {
        self.milestones
            .iter()
            .find(|m| m.alias_index == alias)
            .map(|m| m.index)
    }

    /// Alias of the milestone with this global index
    pub fn alias_from_id(&self, id: usize) -> Option<usize> {
        self.milestones
            .iter()
            .find(|m| m.index == id)
            .map(|m| m.alias_index)
    }

    /// Alias of the milestone shared with the neighbouring anchor `neighbor`
    pub fn alias_from_neighbor_id(&self, neighbor: usize) -> Option<usize> {
        self.milestones
            .iter()
            .find(|m| m.neighbor_anchor_index == neighbor)
            .map(|m| m.alias_index)
    }

    /// Neighbouring anchor across the milestone with this alias
    pub fn neighbor_from_alias(&self, alias: usize) -> Option<usize> {
        self.milestones
            .iter()
            .find(|m| m.alias_index == alias)
            .map(|m| m.neighbor_anchor_index)
    }

    /// Like `id_from_alias`, but a missing alias is an error
    pub fn require_id(&self, alias: usize) -> Result<usize> {
        self.id_from_alias(alias)
            .ok_or(AnalysisError::UnknownAlias {
                anchor: self.index,
                what: "alias",
                value: alias,
            })
    }

    /// Like `neighbor_from_alias`, but a missing alias is an error
    pub fn require_neighbor(&self, alias: usize) -> Result<usize> {
        self.neighbor_from_alias(alias)
            .ok_or(AnalysisError::UnknownAlias {
                anchor: self.index,
                what: "alias",
                value: alias,
            })
    }

    /// An anchor bounded by a single milestone
    pub fn is_dead_end(&self) -> bool {
        self.milestones.len() == 1
    }
}

/// The milestoning formalism used to collect the statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalculationType {
    /// Markovian milestoning with Voronoi tessellations
    Mmvt,
    /// Elber milestoning; trajectories are launched from each anchor's centre milestone
    Elber,
}

impl Default for CalculationType {
    fn default() -> Self {
        Self::Mmvt
    }
}

/// A milestone pair used to hand off Brownian dynamics association statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BdMilestone {
    /// Index of this BD milestone
    pub index: usize,
    /// Global index of the outer milestone BD trajectories start from
    pub outer_milestone: usize,
    /// Global index of the milestone just inside the outer one
    pub inner_milestone: usize,
}

/// Settings for computing association rates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KOnInfo {
    /// BD milestones of the model
    pub bd_milestones: Vec<BdMilestone>,
}

/// The anchors and milestones of a milestoning calculation
///
/// # Examples
///
/// ```
/// use mmvt_rs::model::*;
///
/// let anchors = vec![
///     Anchor::new(0, vec![Milestone::new(0, 1, 1)]),
///     Anchor::new(1, vec![Milestone::new(0, 1, 0), Milestone::new(1, 2, 2)]),
///     Anchor::new(2, vec![Milestone::new(1, 1, 1)]),
/// ];
/// let model = Model::builder().anchors(anchors).build().unwrap();
/// assert_eq!(model.num_milestones(), 2);
/// ```
#[derive(Builder, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[builder(build_fn(validate = "Self::validate", name = "build_inner", private))]
pub struct Model {
    /// Temperature of the simulations in Kelvin
    #[builder(default = "298.15")]
    pub temperature: f64,

    /// Milestoning formalism
    #[builder(default)]
    #[serde(default)]
    pub calculation: CalculationType,

    /// Ordered anchors; `anchors[i].index == i`
    pub anchors: Vec<Anchor>,

    /// Association-rate settings; `None` disables k-on calculations
    #[builder(setter(strip_option), default)]
    #[serde(default)]
    pub k_on_info: Option<KOnInfo>,
}

impl ModelBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if let Some(anchors) = &self.anchors {
            check_topology(anchors)?;
        }
        if let Some(temperature) = self.temperature {
            if !(temperature > 0.0) {
                return Err(format!("temperature must be positive, not {}", temperature));
            }
        }

        Ok(())
    }

    /// Build and validate the model
    pub fn build(&self) -> Result<Model> {
        let model = self.build_inner()?;
        model.bulk_index()?;
        Ok(model)
    }
}

fn check_topology(anchors: &[Anchor]) -> std::result::Result<(), String> {
    for (position, anchor) in anchors.iter().enumerate() {
        if anchor.index != position {
            return Err(format!(
                "anchor at position {} has index {}",
                position, anchor.index
            ));
        }

        let mut aliases = BTreeSet::new();
        let mut ids = BTreeSet::new();
        for milestone in &anchor.milestones {
            if !aliases.insert(milestone.alias_index) {
                return Err(format!(
                    "anchor {} has more than one milestone with alias {}",
                    anchor.index, milestone.alias_index
                ));
            }
            if !ids.insert(milestone.index) {
                return Err(format!(
                    "anchor {} has more than one milestone with index {}",
                    anchor.index, milestone.index
                ));
            }
            if milestone.neighbor_anchor_index >= anchors.len() {
                return Err(format!(
                    "milestone {} of anchor {} borders anchor {}, which does not exist",
                    milestone.index, anchor.index, milestone.neighbor_anchor_index
                ));
            }
        }
    }

    Ok(())
}

impl Model {
    /// Get a new builder for the `Model` struct
    pub fn builder() -> ModelBuilder {
        ModelBuilder::default()
    }

    /// Load and validate a model from JSON
    pub fn from_json_str(json: &str) -> Result<Self> {
        let model: Self = serde_json::from_str(json)?;
        check_topology(&model.anchors).map_err(AnalysisError::InvalidModel)?;
        model.bulk_index()?;
        Ok(model)
    }

    /// Serialise the model to JSON
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Number of anchors, including the bulk anchor
    pub fn num_anchors(&self) -> usize {
        self.anchors.len()
    }

    /// Number of milestones; one more than the largest global milestone index
    pub fn num_milestones(&self) -> usize {
        self.anchors
            .iter()
            .flat_map(|a| a.milestones.iter())
            .map(|m| m.index + 1)
            .max()
            .unwrap_or(0)
    }

    /// Index of the unique bulk anchor
    pub fn bulk_index(&self) -> Result<usize> {
        let mut bulk = None;
        for anchor in self.anchors.iter().filter(|a| a.bulkstate) {
            if let Some(first) = bulk {
                return Err(AnalysisError::MultipleBulkAnchors(first, anchor.index));
            }
            bulk = Some(anchor.index);
        }
        bulk.ok_or(AnalysisError::MissingBulkAnchor)
    }

    /// Milestones that represent the given anchor as a state
    ///
    /// In MMVT every bounding milestone represents the anchor; in Elber milestoning only the
    /// centre milestone does.
    pub fn state_milestones(&self, anchor: &Anchor) -> Vec<usize> {
        match self.calculation {
            CalculationType::Mmvt => anchor.milestones.iter().map(|m| m.index).collect(),
            CalculationType::Elber => anchor
                .id_from_alias(ELBER_CENTRE_ALIAS)
                .into_iter()
                .collect(),
        }
    }

    /// Map from each end-state milestone to the anchor it represents, excluding the bulk state
    pub fn end_milestones(&self) -> BTreeMap<usize, usize> {
        self.anchors
            .iter()
            .filter(|a| a.endstate && !a.bulkstate)
            .flat_map(|a| {
                self.state_milestones(a)
                    .into_iter()
                    .map(move |m| (m, a.index))
            })
            .collect()
    }

    /// Milestones that represent the bulk state
    pub fn bulk_milestones(&self) -> BTreeSet<usize> {
        self.anchors
            .iter()
            .filter(|a| a.bulkstate)
            .flat_map(|a| self.state_milestones(a))
            .collect()
    }
}
