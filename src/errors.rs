use std::fmt::Display;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SGError
{
    /// Refinement or coarsening was requested on a grid without points.
    StorageEmpty,
    /// A dataset driven indicator was used before its samples or residuals were set.
    MissingInputs,
    DimensionMismatch,
    UnsupportedBasisType,
    KdTreeError,
    LZ4DecompressionFailed,
    ReadBufferFailed,
    WriteBufferFailed,
    SerializationFailed,
    DeserializationFailed,    
    FileIOError,
    InvalidIndex,
    InvalidConfiguration,
    LoggerInitFailed,
}
impl std::error::Error for SGError {}

impl Display for SGError
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", *self)
    }
}
