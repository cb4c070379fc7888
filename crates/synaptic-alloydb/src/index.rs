//! Approximate-nearest-neighbor index descriptions and their DDL fragments.

use std::fmt;
use std::str::FromStr;

use crate::{AlloyDbError, DistanceStrategy};

/// Appended to the table name when an index name is not given.
pub const DEFAULT_INDEX_NAME_SUFFIX: &str = "langchainvectorindex";

/// Extension providing the ScaNN index access method on AlloyDB.
pub const SCANN_EXTENSION: &str = "alloydb_scann";

/// Index family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexType {
    Hnsw,
    IvfFlat,
    Ivf,
    ScaNN,
    /// No index at all: applying it drops any existing index.
    ExactNearestNeighbor,
}

impl IndexType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hnsw => "hnsw",
            Self::IvfFlat => "ivfflat",
            Self::Ivf => "ivf",
            Self::ScaNN => "ScaNN",
            Self::ExactNearestNeighbor => "exactnearestneighbor",
        }
    }

    /// Access method name used in `CREATE INDEX ... USING <method>`.
    ///
    /// `None` for [`IndexType::ExactNearestNeighbor`], which has no access
    /// method.
    pub fn access_method(&self) -> Option<&'static str> {
        match self {
            Self::Hnsw => Some("hnsw"),
            Self::IvfFlat => Some("ivfflat"),
            Self::Ivf => Some("ivf"),
            Self::ScaNN => Some("scann"),
            Self::ExactNearestNeighbor => None,
        }
    }

    /// Extension that must be enabled before an index of this type can be
    /// created.
    pub fn required_extension(&self) -> Option<&'static str> {
        match self {
            Self::ScaNN => Some(SCANN_EXTENSION),
            _ => None,
        }
    }
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexType {
    type Err = AlloyDbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hnsw" => Ok(Self::Hnsw),
            "ivfflat" => Ok(Self::IvfFlat),
            "ivf" => Ok(Self::Ivf),
            "ScaNN" | "scann" => Ok(Self::ScaNN),
            "exactnearestneighbor" => Ok(Self::ExactNearestNeighbor),
            other => Err(AlloyDbError::Config(format!("unknown index type '{other}'"))),
        }
    }
}

/// Build-time tuning parameters, one variant per index family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOptions {
    Hnsw { m: u32, ef_construction: u32 },
    IvfFlat { lists: u32 },
    Ivf { lists: u32, quantizer: String },
    ScaNN { num_leaves: u32, quantizer: String },
    None,
}

impl IndexOptions {
    pub fn hnsw() -> Self {
        Self::Hnsw {
            m: 16,
            ef_construction: 64,
        }
    }

    pub fn ivfflat() -> Self {
        Self::IvfFlat { lists: 100 }
    }

    pub fn ivf() -> Self {
        Self::Ivf {
            lists: 100,
            quantizer: "sq8".to_string(),
        }
    }

    pub fn scann() -> Self {
        Self::ScaNN {
            num_leaves: 5,
            quantizer: "sq8".to_string(),
        }
    }

    /// Default options for an index family.
    pub fn default_for(index_type: IndexType) -> Self {
        match index_type {
            IndexType::Hnsw => Self::hnsw(),
            IndexType::IvfFlat => Self::ivfflat(),
            IndexType::Ivf => Self::ivf(),
            IndexType::ScaNN => Self::scann(),
            IndexType::ExactNearestNeighbor => Self::None,
        }
    }

    /// The index family these options belong to.
    pub fn index_type(&self) -> IndexType {
        match self {
            Self::Hnsw { .. } => IndexType::Hnsw,
            Self::IvfFlat { .. } => IndexType::IvfFlat,
            Self::Ivf { .. } => IndexType::Ivf,
            Self::ScaNN { .. } => IndexType::ScaNN,
            Self::None => IndexType::ExactNearestNeighbor,
        }
    }
}

/// A named vector index on the store's embedding column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Index name; when `None` the store derives
    /// `<table><DEFAULT_INDEX_NAME_SUFFIX>`.
    pub name: Option<String>,
    pub index_type: IndexType,
    pub distance_strategy: DistanceStrategy,
    /// Raw SQL predicate for a partial index.
    pub partial_index_predicate: Option<String>,
    pub options: IndexOptions,
}

impl IndexSpec {
    /// Create a spec, checking that `options` belong to `index_type`.
    pub fn new(index_type: IndexType, options: IndexOptions) -> Result<Self, AlloyDbError> {
        if options.index_type() != index_type {
            return Err(mismatch(index_type, &options));
        }
        Ok(Self::from_options(options))
    }

    fn from_options(options: IndexOptions) -> Self {
        Self {
            name: None,
            index_type: options.index_type(),
            distance_strategy: DistanceStrategy::default(),
            partial_index_predicate: None,
            options,
        }
    }

    /// HNSW index with `m = 16`, `ef_construction = 64`.
    pub fn hnsw() -> Self {
        Self::from_options(IndexOptions::hnsw())
    }

    /// IVFFlat index with `lists = 100`.
    pub fn ivfflat() -> Self {
        Self::from_options(IndexOptions::ivfflat())
    }

    /// IVF index with `lists = 100`, `quantizer = sq8`.
    pub fn ivf() -> Self {
        Self::from_options(IndexOptions::ivf())
    }

    /// ScaNN index with `num_leaves = 5`, `quantizer = sq8`.
    pub fn scann() -> Self {
        Self::from_options(IndexOptions::scann())
    }

    /// "No index": applying this spec drops the index instead.
    pub fn exact_nearest_neighbor() -> Self {
        Self::from_options(IndexOptions::None)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_distance_strategy(mut self, distance_strategy: DistanceStrategy) -> Self {
        self.distance_strategy = distance_strategy;
        self
    }

    pub fn with_partial_index_predicate(mut self, predicate: impl Into<String>) -> Self {
        self.partial_index_predicate = Some(predicate.into());
        self
    }

    /// Replace the tuning parameters. Fails if they belong to another index
    /// family.
    pub fn with_options(mut self, options: IndexOptions) -> Result<Self, AlloyDbError> {
        if options.index_type() != self.index_type {
            return Err(mismatch(self.index_type, &options));
        }
        self.options = options;
        Ok(self)
    }

    /// Render the `WITH (...)` parameter clause, e.g.
    /// `(m = 16, ef_construction = 64)`.
    pub fn options_clause(&self) -> Result<String, AlloyDbError> {
        match (self.index_type, &self.options) {
            (IndexType::Hnsw, IndexOptions::Hnsw { m, ef_construction }) => {
                Ok(format!("(m = {m}, ef_construction = {ef_construction})"))
            }
            (IndexType::IvfFlat, IndexOptions::IvfFlat { lists }) => {
                Ok(format!("(lists = {lists})"))
            }
            (IndexType::Ivf, IndexOptions::Ivf { lists, quantizer }) => {
                check_quantizer(self.index_type, quantizer)?;
                Ok(format!("(lists = {lists}, quantizer = {quantizer})"))
            }
            (IndexType::ScaNN, IndexOptions::ScaNN { num_leaves, quantizer }) => {
                check_quantizer(self.index_type, quantizer)?;
                Ok(format!("(num_leaves = {num_leaves}, quantizer = {quantizer})"))
            }
            (IndexType::ExactNearestNeighbor, _) => Err(AlloyDbError::InvalidIndexOptions {
                index_type: self.index_type.to_string(),
                reason: "exact nearest neighbor search has no index parameters".to_string(),
            }),
            (index_type, options) => Err(mismatch(index_type, options)),
        }
    }
}

fn mismatch(index_type: IndexType, options: &IndexOptions) -> AlloyDbError {
    AlloyDbError::InvalidIndexOptions {
        index_type: index_type.to_string(),
        reason: format!("options {options:?} belong to index type {}", options.index_type()),
    }
}

fn check_quantizer(index_type: IndexType, quantizer: &str) -> Result<(), AlloyDbError> {
    if !quantizer.is_empty() && quantizer.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(AlloyDbError::InvalidIndexOptions {
            index_type: index_type.to_string(),
            reason: format!("invalid quantizer '{quantizer}'"),
        })
    }
}
