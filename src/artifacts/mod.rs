//! Artifact resolution: conditions, interpolation, dependency ordering and
//! expansion into dispatchable sources.

pub mod arranger;
pub mod conditions;
pub mod expanded;
pub mod interpolation;

pub use arranger::{arrange, get_artifacts_in_proper_order, ArrangedOrder};
pub use conditions::{convert_supported_os_to_conditions, evaluate, evaluate_all, parse_condition, Condition};
pub use expanded::{ExpandedArtifact, ExpandedSource};
pub use interpolation::{cartesian_product, expand_groupings, interpolate, interpolate_path, placeholders};
