use std::fmt;

/// Distance metric used for similarity search and index operator classes.
///
/// Every variant maps to a fixed pgvector ordering operator and operator
/// class. All three operators grow with dissimilarity, so results are
/// always ordered ascending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DistanceStrategy {
    /// L2 distance (`<->`).
    Euclidean,
    /// Cosine distance (`<=>`).
    #[default]
    CosineDistance,
    /// Negative inner product (`<#>`).
    InnerProduct,
}

impl DistanceStrategy {
    /// The SQL ordering operator.
    pub fn operator(&self) -> &'static str {
        match self {
            Self::Euclidean => "<->",
            Self::CosineDistance => "<=>",
            Self::InnerProduct => "<#>",
        }
    }

    /// The operator class used when building an index on the embedding
    /// column.
    pub fn search_function(&self) -> &'static str {
        match self {
            Self::Euclidean => "vector_l2_ops",
            Self::CosineDistance => "vector_cosine_ops",
            Self::InnerProduct => "vector_ip_ops",
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Euclidean => "euclidean",
            Self::CosineDistance => "cosineDistance",
            Self::InnerProduct => "innerProduct",
        }
    }
}

impl fmt::Display for DistanceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
